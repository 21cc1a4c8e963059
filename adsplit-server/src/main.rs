use adsplit_http::serve;
use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7800";

#[derive(Parser)]
#[command(name = "adsplit", about = "Advertising A/B experiment decision service")]
struct Cli {
    /// Directory holding an optional engine.json
    #[arg(long, env = "ADSPLIT_CONFIG_DIR", default_value = ".")]
    config_dir: String,
    #[arg(long, env = "ADSPLIT_BIND_ADDR")]
    bind_addr: Option<String>,
    #[arg(long, env = "ADSPLIT_PORT")]
    port: Option<u16>,

    /// Bind to 127.0.0.1:0 (OS-assigned ephemeral port).
    #[arg(long)]
    auto_port: bool,

    /// Override the minimum trials per arm from the config file.
    #[arg(long)]
    min_sample_per_arm: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cmd = Cli::command();
    let matches = cmd.get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    let bind_addr = resolve_bind_addr(&cli, &matches)
        .map_err(|msg| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))?;
    std::env::set_var("ADSPLIT_CONFIG_DIR", &cli.config_dir);
    std::env::set_var("ADSPLIT_BIND_ADDR", &bind_addr);
    if let Some(min_sample) = cli.min_sample_per_arm {
        if min_sample == 0 {
            return Err("--min-sample-per-arm must be positive".into());
        }
        std::env::set_var("ADSPLIT_MIN_SAMPLE_PER_ARM", min_sample.to_string());
    }
    serve().await
}

fn resolve_bind_addr(cli: &Cli, matches: &ArgMatches) -> Result<String, String> {
    if cli.auto_port && is_set_on_command_line(matches, "bind_addr") {
        return Err("--auto-port cannot be used with --bind-addr".to_string());
    }

    if cli.auto_port && is_set_on_command_line(matches, "port") {
        return Err("--auto-port cannot be used with --port".to_string());
    }

    if is_set_on_command_line(matches, "bind_addr") {
        if let Some(bind_addr) = &cli.bind_addr {
            return Ok(bind_addr.clone());
        }
    }

    if cli.auto_port {
        return Ok("127.0.0.1:0".to_string());
    }

    if is_set_on_command_line(matches, "port") {
        if let Some(port) = cli.port {
            return Ok(format!("127.0.0.1:{port}"));
        }
    }

    if let Some(bind_addr) = &cli.bind_addr {
        return Ok(bind_addr.clone());
    }

    if let Some(port) = cli.port {
        return Ok(format!("127.0.0.1:{port}"));
    }

    Ok(DEFAULT_BIND_ADDR.to_string())
}

fn is_set_on_command_line(matches: &ArgMatches, arg: &str) -> bool {
    matches.value_source(arg) == Some(ValueSource::CommandLine)
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn parse_cli(args: &[&str]) -> (Cli, ArgMatches) {
        let matches = Cli::command()
            .try_get_matches_from(args)
            .expect("args should parse");
        let cli = Cli::from_arg_matches(&matches).expect("matches should parse into Cli");
        (cli, matches)
    }

    fn clear_bind_env() {
        std::env::remove_var("ADSPLIT_BIND_ADDR");
        std::env::remove_var("ADSPLIT_PORT");
    }

    #[test]
    fn defaults_to_local_port_7800() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        clear_bind_env();
        let (cli, matches) = parse_cli(&["adsplit"]);
        assert_eq!(resolve_bind_addr(&cli, &matches).unwrap(), "127.0.0.1:7800");
        assert_eq!(cli.config_dir, ".");
    }

    #[test]
    fn port_flag_binds_localhost() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        clear_bind_env();
        let (cli, matches) = parse_cli(&["adsplit", "--port", "9100"]);
        assert_eq!(resolve_bind_addr(&cli, &matches).unwrap(), "127.0.0.1:9100");
    }

    #[test]
    fn command_line_bind_addr_beats_env_port() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        clear_bind_env();
        std::env::set_var("ADSPLIT_PORT", "9200");

        let (cli, matches) = parse_cli(&["adsplit", "--bind-addr", "0.0.0.0:9300"]);
        let bind_addr = resolve_bind_addr(&cli, &matches).expect("resolve bind addr");

        clear_bind_env();
        assert_eq!(bind_addr, "0.0.0.0:9300");
    }

    #[test]
    fn auto_port_overrides_env_bind_settings() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        std::env::set_var("ADSPLIT_BIND_ADDR", "127.0.0.1:19001");
        std::env::set_var("ADSPLIT_PORT", "19002");

        let (cli, matches) = parse_cli(&["adsplit", "--auto-port"]);
        let bind_addr = resolve_bind_addr(&cli, &matches).expect("resolve bind addr");

        clear_bind_env();
        assert_eq!(bind_addr, "127.0.0.1:0");
    }

    #[test]
    fn auto_port_rejects_explicit_conflicting_flags() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        clear_bind_env();
        let (cli_with_port, matches_with_port) =
            parse_cli(&["adsplit", "--auto-port", "--port", "7801"]);
        assert_eq!(
            resolve_bind_addr(&cli_with_port, &matches_with_port).unwrap_err(),
            "--auto-port cannot be used with --port"
        );

        let (cli_with_bind, matches_with_bind) =
            parse_cli(&["adsplit", "--auto-port", "--bind-addr", "127.0.0.1:7801"]);
        assert_eq!(
            resolve_bind_addr(&cli_with_bind, &matches_with_bind).unwrap_err(),
            "--auto-port cannot be used with --bind-addr"
        );
    }
}
