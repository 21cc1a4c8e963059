use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::config::{
    ConfidenceLevel, EngineConfig, Experiment, ExperimentError, ExperimentStatus, Objective,
    TestVariable, Variant,
};

const MS_PER_DAY: i64 = 86_400_000;
pub const DEFAULT_DURATION_DAYS: u32 = 7;

fn default_duration_days() -> u32 {
    DEFAULT_DURATION_DAYS
}

fn default_confidence_level() -> u32 {
    ConfidenceLevel::default().percent()
}

/// Request to set up a new experiment over existing ad entities.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub test_variable: TestVariable,
    pub objective: Objective,
    /// Campaign, ad set or ad ids, one per variant, in variant order.
    pub variant_refs: Vec<String>,
    #[serde(default = "default_duration_days")]
    pub duration_days: u32,
    /// Raw percentage; checked against the supported levels by [`build_plan`].
    #[serde(default = "default_confidence_level")]
    pub confidence_level: u32,
    #[serde(default)]
    pub daily_budget_per_variant: Option<u64>,
}

/// `variant_a`, `variant_b`, … then `variant_27`, … past the alphabet.
fn variant_suffix(index: usize) -> String {
    if index < 26 {
        ((b'a' + index as u8) as char).to_string()
    } else {
        (index + 1).to_string()
    }
}

/// Equal split of 100 percent, remainder to the first variants.
pub fn traffic_splits(n: usize) -> Vec<u32> {
    if n == 0 {
        return Vec::new();
    }
    let n32 = n as u32;
    let base = 100 / n32;
    let remainder = (100 % n32) as usize;
    (0..n)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Validate `request` against `config` and turn it into a RUNNING experiment
/// starting at `start_time` (epoch millis). Nothing is produced on error.
pub fn build_plan(
    request: &PlanRequest,
    config: &EngineConfig,
    start_time: i64,
) -> Result<Experiment, ExperimentError> {
    let confidence_level = ConfidenceLevel::try_from(request.confidence_level)?;

    let refs: Vec<&str> = request.variant_refs.iter().map(|r| r.trim()).collect();
    if refs.iter().any(|r| r.is_empty()) {
        return Err(ExperimentError::InvalidConfig(
            "variant references must not be empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = refs.iter().find(|r| !seen.insert(**r)) {
        return Err(ExperimentError::InvalidConfig(format!(
            "duplicate variant reference: {dup}"
        )));
    }
    if refs.len() < 2 {
        return Err(ExperimentError::InvalidConfig(format!(
            "at least 2 variants are required (got {})",
            refs.len()
        )));
    }
    if refs.len() > config.max_variants {
        return Err(ExperimentError::InvalidConfig(format!(
            "at most {} variants are allowed (got {})",
            config.max_variants,
            refs.len()
        )));
    }
    if request.duration_days == 0 || request.duration_days > config.max_duration_days {
        return Err(ExperimentError::InvalidConfig(format!(
            "durationDays must be between 1 and {} (got {})",
            config.max_duration_days, request.duration_days
        )));
    }
    if request.daily_budget_per_variant == Some(0) {
        return Err(ExperimentError::InvalidConfig(
            "dailyBudgetPerVariant must be positive".to_string(),
        ));
    }

    let name = match request.name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => format!("Experiment_{start_time}"),
    };

    let variants = refs
        .iter()
        .zip(traffic_splits(refs.len()))
        .enumerate()
        .map(|(i, (entity_ref, traffic_split))| {
            let suffix = variant_suffix(i);
            Variant {
                id: format!("variant_{suffix}"),
                name: format!("Variant {}", suffix.to_uppercase()),
                entity_ref: entity_ref.to_string(),
                traffic_split,
            }
        })
        .collect();

    let experiment = Experiment {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        test_variable: request.test_variable,
        objective: request.objective,
        confidence_level,
        level: request.test_variable.level(),
        variants,
        status: ExperimentStatus::Running,
        start_time,
        scheduled_end_time: start_time + i64::from(request.duration_days) * MS_PER_DAY,
        end_time: None,
        duration_days: request.duration_days,
        daily_budget_per_variant: request.daily_budget_per_variant,
    };
    experiment.validate()?;
    Ok(experiment)
}
