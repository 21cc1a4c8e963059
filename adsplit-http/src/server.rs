use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::{
    analyze_metrics, apply_winner, create_experiment, end_experiment, get_experiment,
    get_experiment_results, health, list_experiments, pause_experiment, resume_experiment,
    AppState,
};
use adsplit::{DryRunCampaignControl, EngineConfig, LifecycleController};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7800";
const DEFAULT_MAX_BODY_MB: usize = 10;

/// All routes over `state`, with tracing and CORS layers.
pub fn build_router(state: Arc<AppState>) -> Router {
    let max_body_mb = std::env::var("ADSPLIT_MAX_BODY_MB")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_BODY_MB);

    Router::new()
        .route("/health", get(health))
        .route("/1/experiments", post(create_experiment).get(list_experiments))
        .route("/1/experiments/:id", get(get_experiment))
        .route("/1/experiments/:id/pause", post(pause_experiment))
        .route("/1/experiments/:id/resume", post(resume_experiment))
        .route("/1/experiments/:id/results", post(get_experiment_results))
        .route("/1/experiments/:id/end", post(end_experiment))
        .route("/1/experiments/:id/apply-winner", post(apply_winner))
        .route("/1/analyze", post(analyze_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_mb * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive().max_age(std::time::Duration::from_secs(86400)))
}

pub async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let startup_start = std::time::Instant::now();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_dir = std::env::var("ADSPLIT_CONFIG_DIR").unwrap_or_else(|_| ".".into());
    let config = EngineConfig::load_or_default(Path::new(&config_dir));
    tracing::info!(
        config_dir = %config_dir,
        min_sample_per_arm = config.min_sample_per_arm,
        max_variants = config.max_variants,
        max_duration_days = config.max_duration_days,
        "engine configuration loaded"
    );

    // No ad-platform client is wired in; actions are only logged.
    let control = Arc::new(DryRunCampaignControl::new());
    let controller = Arc::new(LifecycleController::new(config, control));
    let state = Arc::new(AppState::new(controller));

    let app = build_router(state);

    let bind_addr =
        std::env::var("ADSPLIT_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    let local_addr = listener.local_addr()?.to_string();
    tracing::info!(addr = %local_addr, "listening");
    print_startup_banner(&local_addr, startup_start.elapsed().as_millis(), &config_dir);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn print_startup_banner(bind_addr: &str, startup_ms: u128, config_dir: &str) {
    use colored::Colorize;

    let url = format!("http://{}", bind_addr);
    let version = format!("v{}", env!("CARGO_PKG_VERSION"));
    let timing = format!("ready in {}ms", startup_ms);

    println!();
    println!(
        "  {} {}  {}",
        "adsplit".bold().bright_green(),
        version.as_str().dimmed(),
        timing.as_str().dimmed(),
    );
    println!();
    println!("  {}  Local:        {}", "➜".green(), url.as_str().cyan());
    let experiments = format!("{}/1/experiments", url);
    println!(
        "  {}  Experiments:  {}",
        "➜".green(),
        experiments.as_str().cyan()
    );
    println!("  {}  Config:       {}", "➜".green(), config_dir.dimmed());
    println!(
        "  {}  Campaign control is {}; actions are logged, not sent.",
        "➜".green(),
        "dry-run".yellow()
    );
    println!();
}
