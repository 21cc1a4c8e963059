use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// What an experiment varies between its arms.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestVariable {
    Creative,
    Audience,
    Placement,
    Optimization,
    BidStrategy,
    LandingPage,
}

impl TestVariable {
    /// The ad entity level each variant reference points at.
    pub fn level(self) -> EntityLevel {
        match self {
            TestVariable::Creative | TestVariable::LandingPage => EntityLevel::Ad,
            TestVariable::Audience | TestVariable::Placement | TestVariable::Optimization => {
                EntityLevel::Adset
            }
            TestVariable::BidStrategy => EntityLevel::Campaign,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TestVariable::Creative => "Creative",
            TestVariable::Audience => "Audience",
            TestVariable::Placement => "Placement",
            TestVariable::Optimization => "Optimization event",
            TestVariable::BidStrategy => "Bid strategy",
            TestVariable::LandingPage => "Landing page",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityLevel {
    Ad,
    Adset,
    Campaign,
}

/// The metric an experiment is judged on.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    CostPerResult,
    Ctr,
    ConversionRate,
    Roas,
    Cpc,
    Cpm,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    LowerIsBetter,
    HigherIsBetter,
}

impl Objective {
    pub const ALL: [Objective; 6] = [
        Objective::CostPerResult,
        Objective::Ctr,
        Objective::ConversionRate,
        Objective::Roas,
        Objective::Cpc,
        Objective::Cpm,
    ];

    pub fn direction(self) -> Direction {
        match self {
            Objective::CostPerResult | Objective::Cpc | Objective::Cpm => Direction::LowerIsBetter,
            Objective::Ctr | Objective::ConversionRate | Objective::Roas => {
                Direction::HigherIsBetter
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Objective::CostPerResult => "CPA (cost per result)",
            Objective::Ctr => "CTR (click-through rate)",
            Objective::ConversionRate => "CVR (conversion rate)",
            Objective::Roas => "ROAS (return on ad spend)",
            Objective::Cpc => "CPC (cost per click)",
            Objective::Cpm => "CPM (cost per mille)",
        }
    }
}

/// Required certainty before a leader may be called a winner.
///
/// Serialized as the bare percentage (`65`, `80`, `90`, `95`); any other
/// number is rejected at deserialization time.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u32", into = "u32")]
pub enum ConfidenceLevel {
    P65,
    P80,
    P90,
    P95,
}

impl ConfidenceLevel {
    pub const ALL: [ConfidenceLevel; 4] = [
        ConfidenceLevel::P65,
        ConfidenceLevel::P80,
        ConfidenceLevel::P90,
        ConfidenceLevel::P95,
    ];

    pub fn percent(self) -> u32 {
        match self {
            ConfidenceLevel::P65 => 65,
            ConfidenceLevel::P80 => 80,
            ConfidenceLevel::P90 => 90,
            ConfidenceLevel::P95 => 95,
        }
    }

    /// Significance threshold: 1 - confidence/100.
    pub fn alpha(self) -> f64 {
        // Exact decimal values so 0.10 compares equal to a rounded p-value of 0.1.
        match self {
            ConfidenceLevel::P65 => 0.35,
            ConfidenceLevel::P80 => 0.20,
            ConfidenceLevel::P90 => 0.10,
            ConfidenceLevel::P95 => 0.05,
        }
    }
}

impl Default for ConfidenceLevel {
    fn default() -> Self {
        ConfidenceLevel::P90
    }
}

impl TryFrom<u32> for ConfidenceLevel {
    type Error = ExperimentError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            65 => Ok(ConfidenceLevel::P65),
            80 => Ok(ConfidenceLevel::P80),
            90 => Ok(ConfidenceLevel::P90),
            95 => Ok(ConfidenceLevel::P95),
            other => Err(ExperimentError::InvalidConfig(format!(
                "confidence level must be one of 65, 80, 90, 95 (got {other})"
            ))),
        }
    }
}

impl From<ConfidenceLevel> for u32 {
    fn from(level: ConfidenceLevel) -> u32 {
        level.percent()
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// What the caller wants done once a winner is known.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WinnerAction {
    ScaleBudget,
    PauseLosers,
    ApplyAndEnd,
    #[default]
    ReportOnly,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Running,
    Paused,
    Completed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub name: String,
    /// Campaign, ad set or ad id this arm drives.
    pub entity_ref: String,
    /// Share of traffic in whole percent.
    pub traffic_split: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub test_variable: TestVariable,
    pub objective: Objective,
    pub confidence_level: ConfidenceLevel,
    pub level: EntityLevel,
    pub variants: Vec<Variant>,
    pub status: ExperimentStatus,
    pub start_time: i64,
    pub scheduled_end_time: i64,
    pub end_time: Option<i64>,
    pub duration_days: u32,
    pub daily_budget_per_variant: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("experiment not found: {0}")]
    NotFound(String),
    #[error("experiment already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid status transition: experiment is {0}")]
    InvalidStatus(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid metrics for variant {variant_id}: {reason}")]
    InvalidMetric { variant_id: String, reason: String },
    #[error("experiment is closed: {0}")]
    Closed(String),
    #[error("campaign control failed: {0}")]
    CampaignControl(String),
}

impl ExperimentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExperimentError::NotFound(_) => StatusCode::NOT_FOUND,
            ExperimentError::AlreadyExists(_) => StatusCode::CONFLICT,
            ExperimentError::InvalidStatus(_) => StatusCode::CONFLICT,
            ExperimentError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            ExperimentError::InvalidMetric { .. } => StatusCode::BAD_REQUEST,
            ExperimentError::Closed(_) => StatusCode::CONFLICT,
            ExperimentError::CampaignControl(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl Experiment {
    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.variants.len() < 2 {
            return Err(ExperimentError::InvalidConfig(
                "an experiment needs at least 2 variants".to_string(),
            ));
        }
        let mut ids = HashSet::new();
        let mut refs = HashSet::new();
        for variant in &self.variants {
            if !ids.insert(variant.id.as_str()) {
                return Err(ExperimentError::InvalidConfig(format!(
                    "duplicate variant id: {}",
                    variant.id
                )));
            }
            if !refs.insert(variant.entity_ref.as_str()) {
                return Err(ExperimentError::InvalidConfig(format!(
                    "duplicate variant reference: {}",
                    variant.entity_ref
                )));
            }
        }
        let split_total: u32 = self.variants.iter().map(|v| v.traffic_split).sum();
        if split_total != 100 {
            return Err(ExperimentError::InvalidConfig(format!(
                "traffic splits must sum to 100 (got {split_total})"
            )));
        }
        if self.end_time.is_some() != (self.status == ExperimentStatus::Completed) {
            return Err(ExperimentError::InvalidConfig(
                "endTime must be set exactly when the experiment is completed".to_string(),
            ));
        }
        Ok(())
    }

    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    pub fn is_closed(&self) -> bool {
        self.status == ExperimentStatus::Completed
    }
}

// ── Engine configuration ────────────────────────────────────────────

pub const DEFAULT_MIN_SAMPLE_PER_ARM: u64 = 30;
pub const DEFAULT_MAX_VARIANTS: usize = 5;
pub const DEFAULT_MAX_DURATION_DAYS: u32 = 30;
pub const DEFAULT_SCALE_PERCENT: f64 = 50.0;
pub const DEFAULT_POWER: f64 = 0.8;
/// Beyond this an equal split of 100% leaves some variants with 0%.
pub const MAX_VARIANTS_LIMIT: usize = 100;

/// Tunables shared by the plan builder, analyzer and lifecycle controller.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Trials each side of a comparison needs before it may be significant.
    pub min_sample_per_arm: u64,
    pub max_variants: usize,
    pub max_duration_days: u32,
    /// Budget increase requested for a winner under `scale_budget`.
    pub default_scale_percent: f64,
    /// Statistical power used when estimating the sample still needed.
    pub power: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_sample_per_arm: DEFAULT_MIN_SAMPLE_PER_ARM,
            max_variants: DEFAULT_MAX_VARIANTS,
            max_duration_days: DEFAULT_MAX_DURATION_DAYS,
            default_scale_percent: DEFAULT_SCALE_PERCENT,
            power: DEFAULT_POWER,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.min_sample_per_arm == 0 {
            return Err(ExperimentError::InvalidConfig(
                "minSamplePerArm must be at least 1".to_string(),
            ));
        }
        if !(2..=MAX_VARIANTS_LIMIT).contains(&self.max_variants) {
            return Err(ExperimentError::InvalidConfig(format!(
                "maxVariants must be between 2 and {MAX_VARIANTS_LIMIT} (got {})",
                self.max_variants
            )));
        }
        if self.max_duration_days == 0 {
            return Err(ExperimentError::InvalidConfig(
                "maxDurationDays must be at least 1".to_string(),
            ));
        }
        if !self.default_scale_percent.is_finite() || self.default_scale_percent <= 0.0 {
            return Err(ExperimentError::InvalidConfig(
                "defaultScalePercent must be a positive number".to_string(),
            ));
        }
        if !(self.power > 0.0 && self.power < 1.0) {
            return Err(ExperimentError::InvalidConfig(
                "power must be in (0.0, 1.0) exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load `{config_dir}/engine.json` (defaults when absent or invalid),
    /// then apply any `ADSPLIT_*` environment overrides on top.
    pub fn load_or_default(config_dir: &Path) -> Self {
        Self::load_file(config_dir).with_env_overrides()
    }

    fn load_file(config_dir: &Path) -> Self {
        let engine_json = config_dir.join("engine.json");
        if !engine_json.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&engine_json) {
            Ok(content) => match serde_json::from_str::<EngineConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => {
                        tracing::info!(
                            min_sample_per_arm = config.min_sample_per_arm,
                            max_variants = config.max_variants,
                            "Loaded engine config from {}",
                            engine_json.display()
                        );
                        config
                    }
                    Err(e) => {
                        tracing::error!("Rejected engine.json: {}, using defaults", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to parse engine.json: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!("Failed to read engine.json: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Defaults overridden by any parseable `ADSPLIT_*` variable.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// `self` with every parseable `ADSPLIT_*` variable applied. An invalid
    /// combination is logged and `self` is kept unchanged.
    pub fn with_env_overrides(self) -> Self {
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            let raw = std::env::var(key).ok()?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
                    None
                }
            }
        }

        let config = Self {
            min_sample_per_arm: env_parse("ADSPLIT_MIN_SAMPLE_PER_ARM")
                .unwrap_or(self.min_sample_per_arm),
            max_variants: env_parse("ADSPLIT_MAX_VARIANTS").unwrap_or(self.max_variants),
            max_duration_days: env_parse("ADSPLIT_MAX_DURATION_DAYS")
                .unwrap_or(self.max_duration_days),
            default_scale_percent: env_parse("ADSPLIT_DEFAULT_SCALE_PERCENT")
                .unwrap_or(self.default_scale_percent),
            power: env_parse("ADSPLIT_POWER").unwrap_or(self.power),
        };

        match config.validate() {
            Ok(()) => {
                if config != self {
                    tracing::info!(
                        min_sample_per_arm = config.min_sample_per_arm,
                        max_variants = config.max_variants,
                        "Applied ADSPLIT_* overrides"
                    );
                }
                config
            }
            Err(e) => {
                tracing::error!("Invalid ADSPLIT_* settings: {}, ignoring overrides", e);
                self
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for key in [
            "ADSPLIT_MIN_SAMPLE_PER_ARM",
            "ADSPLIT_MAX_VARIANTS",
            "ADSPLIT_MAX_DURATION_DAYS",
            "ADSPLIT_DEFAULT_SCALE_PERCENT",
            "ADSPLIT_POWER",
        ] {
            std::env::remove_var(key);
        }
    }

    fn valid_experiment() -> Experiment {
        Experiment {
            id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            name: "CTA test".to_string(),
            test_variable: TestVariable::Creative,
            objective: Objective::CostPerResult,
            confidence_level: ConfidenceLevel::P90,
            level: EntityLevel::Ad,
            variants: vec![
                Variant {
                    id: "variant_a".to_string(),
                    name: "Variant A".to_string(),
                    entity_ref: "ad_001".to_string(),
                    traffic_split: 50,
                },
                Variant {
                    id: "variant_b".to_string(),
                    name: "Variant B".to_string(),
                    entity_ref: "ad_002".to_string(),
                    traffic_split: 50,
                },
            ],
            status: ExperimentStatus::Running,
            start_time: 1700000000000,
            scheduled_end_time: 1700604800000,
            end_time: None,
            duration_days: 7,
            daily_budget_per_variant: None,
        }
    }

    #[test]
    fn validate_valid_experiment_succeeds() {
        assert!(valid_experiment().validate().is_ok());
    }

    #[test]
    fn validate_single_variant_fails() {
        let mut e = valid_experiment();
        e.variants.truncate(1);
        e.variants[0].traffic_split = 100;
        assert!(matches!(e.validate(), Err(ExperimentError::InvalidConfig(_))));
    }

    #[test]
    fn validate_duplicate_variant_id_fails() {
        let mut e = valid_experiment();
        e.variants[1].id = "variant_a".to_string();
        assert!(e.validate().is_err());
    }

    #[test]
    fn validate_duplicate_entity_ref_fails() {
        let mut e = valid_experiment();
        e.variants[1].entity_ref = "ad_001".to_string();
        assert!(e.validate().is_err());
    }

    #[test]
    fn validate_split_not_summing_to_100_fails() {
        let mut e = valid_experiment();
        e.variants[1].traffic_split = 49;
        assert!(e.validate().is_err());
    }

    #[test]
    fn validate_end_time_on_running_experiment_fails() {
        let mut e = valid_experiment();
        e.end_time = Some(1700100000000);
        assert!(e.validate().is_err());
    }

    #[test]
    fn validate_completed_without_end_time_fails() {
        let mut e = valid_experiment();
        e.status = ExperimentStatus::Completed;
        assert!(e.validate().is_err());
        e.end_time = Some(1700100000000);
        assert!(e.validate().is_ok());
    }

    #[test]
    fn confidence_level_accepts_only_closed_set() {
        for pct in [65u32, 80, 90, 95] {
            assert_eq!(ConfidenceLevel::try_from(pct).unwrap().percent(), pct);
        }
        for pct in [0u32, 50, 77, 99, 100] {
            assert!(matches!(
                ConfidenceLevel::try_from(pct),
                Err(ExperimentError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn confidence_level_alpha_matches_percent() {
        for level in ConfidenceLevel::ALL {
            let expected = 1.0 - level.percent() as f64 / 100.0;
            assert!((level.alpha() - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn confidence_level_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&ConfidenceLevel::P95).unwrap(), "95");
        let parsed: ConfidenceLevel = serde_json::from_str("80").unwrap();
        assert_eq!(parsed, ConfidenceLevel::P80);
        assert!(serde_json::from_str::<ConfidenceLevel>("77").is_err());
    }

    #[test]
    fn objective_directions() {
        assert_eq!(Objective::CostPerResult.direction(), Direction::LowerIsBetter);
        assert_eq!(Objective::Cpc.direction(), Direction::LowerIsBetter);
        assert_eq!(Objective::Cpm.direction(), Direction::LowerIsBetter);
        assert_eq!(Objective::Ctr.direction(), Direction::HigherIsBetter);
        assert_eq!(Objective::ConversionRate.direction(), Direction::HigherIsBetter);
        assert_eq!(Objective::Roas.direction(), Direction::HigherIsBetter);
    }

    #[test]
    fn test_variable_levels() {
        assert_eq!(TestVariable::Creative.level(), EntityLevel::Ad);
        assert_eq!(TestVariable::LandingPage.level(), EntityLevel::Ad);
        assert_eq!(TestVariable::Audience.level(), EntityLevel::Adset);
        assert_eq!(TestVariable::BidStrategy.level(), EntityLevel::Campaign);
    }

    #[test]
    fn experiment_serializes_to_camel_case_with_snake_case_enums() {
        let json = serde_json::to_string(&valid_experiment()).unwrap();
        assert!(json.contains("\"testVariable\":\"creative\""));
        assert!(json.contains("\"objective\":\"cost_per_result\""));
        assert!(json.contains("\"confidenceLevel\":90"));
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"entityRef\":\"ad_001\""));
        assert!(!json.contains("test_variable"));
    }

    #[test]
    fn experiment_roundtrips_through_json() {
        let e = valid_experiment();
        let json = serde_json::to_string(&e).unwrap();
        let back: Experiment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(
            ExperimentError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ExperimentError::Closed("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ExperimentError::InvalidMetric {
                variant_id: "a".into(),
                reason: "negative".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ExperimentError::CampaignControl("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn engine_config_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_sample_per_arm, 30);
        assert_eq!(config.max_variants, 5);
    }

    #[test]
    fn engine_config_rejects_out_of_range_power() {
        let config = EngineConfig {
            power: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn load_or_default_without_file_uses_defaults() {
        clear_env();
        let temp_dir = tempfile::tempdir().unwrap();
        assert_eq!(
            EngineConfig::load_or_default(temp_dir.path()),
            EngineConfig::default()
        );
    }

    #[test]
    #[serial]
    fn load_or_default_reads_partial_file() {
        clear_env();
        let temp_dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(temp_dir.path().join("engine.json")).unwrap();
        file.write_all(br#"{"minSamplePerArm": 100, "maxVariants": 3}"#)
            .unwrap();

        let config = EngineConfig::load_or_default(temp_dir.path());
        assert_eq!(config.min_sample_per_arm, 100);
        assert_eq!(config.max_variants, 3);
        assert_eq!(config.max_duration_days, DEFAULT_MAX_DURATION_DAYS);
    }

    #[test]
    #[serial]
    fn load_or_default_ignores_invalid_file() {
        clear_env();
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("engine.json"), r#"{"power": 2.0}"#).unwrap();
        assert_eq!(
            EngineConfig::load_or_default(temp_dir.path()),
            EngineConfig::default()
        );
    }

    #[test]
    #[serial]
    fn env_overrides_apply_on_top_of_engine_json() {
        clear_env();
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("engine.json"),
            r#"{"minSamplePerArm": 100, "maxVariants": 3}"#,
        )
        .unwrap();
        std::env::set_var("ADSPLIT_MIN_SAMPLE_PER_ARM", "500");

        let config = EngineConfig::load_or_default(temp_dir.path());
        clear_env();

        assert_eq!(config.min_sample_per_arm, 500);
        assert_eq!(config.max_variants, 3, "file values without an override survive");
    }

    #[test]
    #[serial]
    fn invalid_env_override_keeps_engine_json_values() {
        clear_env();
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("engine.json"),
            r#"{"minSamplePerArm": 100}"#,
        )
        .unwrap();
        std::env::set_var("ADSPLIT_POWER", "1.5");

        let config = EngineConfig::load_or_default(temp_dir.path());
        clear_env();

        assert_eq!(config.min_sample_per_arm, 100);
        assert_eq!(config.power, DEFAULT_POWER);
    }

    #[test]
    fn engine_config_caps_max_variants() {
        let at_limit = EngineConfig {
            max_variants: MAX_VARIANTS_LIMIT,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());

        let over_limit = EngineConfig {
            max_variants: MAX_VARIANTS_LIMIT + 1,
            ..Default::default()
        };
        assert!(matches!(
            over_limit.validate(),
            Err(ExperimentError::InvalidConfig(_))
        ));
    }

    #[test]
    #[serial]
    fn from_env_overrides_and_ignores_garbage() {
        clear_env();
        std::env::set_var("ADSPLIT_MIN_SAMPLE_PER_ARM", "50");
        std::env::set_var("ADSPLIT_MAX_VARIANTS", "not-a-number");
        let config = EngineConfig::from_env();
        clear_env();

        assert_eq!(config.min_sample_per_arm, 50);
        assert_eq!(config.max_variants, DEFAULT_MAX_VARIANTS);
    }

    #[test]
    #[serial]
    fn from_env_invalid_combination_falls_back_to_defaults() {
        clear_env();
        std::env::set_var("ADSPLIT_MIN_SAMPLE_PER_ARM", "0");
        let config = EngineConfig::from_env();
        clear_env();

        assert_eq!(config, EngineConfig::default());
    }
}
