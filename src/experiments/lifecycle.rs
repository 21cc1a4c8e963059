use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::analyzer::{ActionRequest, Analyzer, ExperimentResults, Progress, Recommendation};
use super::config::{EngineConfig, Experiment, ExperimentError, ExperimentStatus, WinnerAction};
use super::metrics::RawVariantCounters;
use super::plan::{build_plan, PlanRequest};
use super::stats::round_to;

const MS_PER_DAY: f64 = 86_400_000.0;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Campaign control ────────────────────────────────────────────────

/// Executes action requests against the ad platform.
pub trait CampaignControl: Send + Sync {
    fn execute(&self, experiment: &Experiment, request: &ActionRequest)
        -> Result<(), ExperimentError>;
}

/// Logs requests without touching any ad platform. Built with
/// [`DryRunCampaignControl::recording`] it also keeps every request in memory.
#[derive(Debug, Default)]
pub struct DryRunCampaignControl {
    executed: Option<Mutex<Vec<ActionRequest>>>,
}

impl DryRunCampaignControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps every executed request for [`executed`](Self::executed). The
    /// list is never trimmed; meant for tests and short-lived tools.
    pub fn recording() -> Self {
        Self {
            executed: Some(Mutex::new(Vec::new())),
        }
    }

    /// Requests seen so far; always empty unless built with `recording`.
    pub fn executed(&self) -> Vec<ActionRequest> {
        match &self.executed {
            Some(executed) => executed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            None => Vec::new(),
        }
    }
}

impl CampaignControl for DryRunCampaignControl {
    fn execute(
        &self,
        experiment: &Experiment,
        request: &ActionRequest,
    ) -> Result<(), ExperimentError> {
        tracing::info!(
            experiment_id = %experiment.id,
            variant_id = %request.variant_id,
            entity_ref = %request.entity_ref,
            action = ?request.action,
            magnitude = ?request.magnitude,
            "campaign action (dry run)"
        );
        if let Some(executed) = &self.executed {
            executed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(request.clone());
        }
        Ok(())
    }
}

// ── Options and outputs ─────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationOptions {
    pub winner_action: WinnerAction,
    /// Complete the experiment when the recommendation is `apply_and_end`.
    pub auto_apply: bool,
    /// Compute actions without sending them to campaign control.
    pub dry_run: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            winner_action: WinnerAction::default(),
            auto_apply: false,
            dry_run: true,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchFailure {
    pub request: ActionRequest,
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub dispatched: Vec<ActionRequest>,
    pub failures: Vec<DispatchFailure>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// State after this call.
    pub experiment: Experiment,
    pub results: ExperimentResults,
    pub recommendation: Recommendation,
    /// Requests implied by the recommendation.
    pub actions: Vec<ActionRequest>,
    /// Present only when requests were sent to campaign control.
    pub dispatch: Option<DispatchReport>,
    /// Whether this call moved the experiment to COMPLETED.
    pub completed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExperimentFilter {
    pub status: Option<ExperimentStatus>,
}

/// Elapsed days of `experiment` at `now` against its scheduled duration.
pub fn progress_at(experiment: &Experiment, now: i64) -> Progress {
    let reference = experiment.end_time.unwrap_or(now);
    let elapsed_days = ((reference - experiment.start_time) as f64 / MS_PER_DAY).max(0.0);
    let percent = if experiment.duration_days == 0 {
        100.0
    } else {
        (elapsed_days / experiment.duration_days as f64 * 100.0).min(100.0)
    };
    Progress {
        elapsed_days: round_to(elapsed_days, 2),
        duration_days: experiment.duration_days,
        percent_complete: round_to(percent, 1),
        past_scheduled_end: reference >= experiment.scheduled_end_time,
    }
}

// ── Controller ──────────────────────────────────────────────────────

/// Sole owner of experiment status. Every transition is a compare-and-set
/// under the experiment's map entry guard; campaign control is called only
/// after the guard is dropped.
pub struct LifecycleController {
    experiments: DashMap<String, Experiment>,
    analyzer: Analyzer,
    control: Arc<dyn CampaignControl>,
}

impl LifecycleController {
    pub fn new(config: EngineConfig, control: Arc<dyn CampaignControl>) -> Self {
        Self {
            experiments: DashMap::new(),
            analyzer: Analyzer::new(config),
            control,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.analyzer.config()
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Build a plan starting now and register it.
    pub fn create(&self, request: &PlanRequest) -> Result<Experiment, ExperimentError> {
        let experiment = build_plan(request, self.config(), now_ms())?;
        self.register(experiment)
    }

    pub fn register(&self, experiment: Experiment) -> Result<Experiment, ExperimentError> {
        experiment.validate()?;
        match self.experiments.entry(experiment.id.clone()) {
            Entry::Occupied(_) => Err(ExperimentError::AlreadyExists(experiment.id)),
            Entry::Vacant(slot) => {
                tracing::info!(
                    experiment_id = %experiment.id,
                    variants = experiment.variants.len(),
                    objective = ?experiment.objective,
                    "registered experiment"
                );
                slot.insert(experiment.clone());
                Ok(experiment)
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Experiment, ExperimentError> {
        self.experiments
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| ExperimentError::NotFound(id.to_string()))
    }

    /// Newest first.
    pub fn list(&self, filter: &ExperimentFilter) -> Vec<Experiment> {
        let mut experiments: Vec<Experiment> = self
            .experiments
            .iter()
            .filter(|entry| {
                filter
                    .status
                    .map_or(true, |status| entry.value().status == status)
            })
            .map(|entry| entry.value().clone())
            .collect();
        experiments.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
        experiments
    }

    /// Apply `change` while holding the entry guard. Completed experiments
    /// are rejected before `change` runs.
    fn transition<F>(&self, id: &str, change: F) -> Result<Experiment, ExperimentError>
    where
        F: FnOnce(&mut Experiment) -> Result<(), ExperimentError>,
    {
        let mut entry = self
            .experiments
            .get_mut(id)
            .ok_or_else(|| ExperimentError::NotFound(id.to_string()))?;
        if entry.is_closed() {
            return Err(ExperimentError::Closed(id.to_string()));
        }
        let from = entry.status;
        change(entry.value_mut())?;
        tracing::info!(experiment_id = %id, from = ?from, to = ?entry.status, "experiment status changed");
        Ok(entry.clone())
    }

    pub fn pause(&self, id: &str) -> Result<Experiment, ExperimentError> {
        self.transition(id, |experiment| {
            if experiment.status != ExperimentStatus::Running {
                return Err(ExperimentError::InvalidStatus(format!(
                    "{:?}",
                    experiment.status
                )));
            }
            experiment.status = ExperimentStatus::Paused;
            Ok(())
        })
    }

    pub fn resume(&self, id: &str) -> Result<Experiment, ExperimentError> {
        self.transition(id, |experiment| {
            if experiment.status != ExperimentStatus::Paused {
                return Err(ExperimentError::InvalidStatus(format!(
                    "{:?}",
                    experiment.status
                )));
            }
            experiment.status = ExperimentStatus::Running;
            Ok(())
        })
    }

    fn complete(&self, id: &str) -> Result<Experiment, ExperimentError> {
        self.transition(id, |experiment| {
            experiment.status = ExperimentStatus::Completed;
            experiment.end_time = Some(now_ms());
            Ok(())
        })
    }

    fn open_experiment(&self, id: &str) -> Result<Experiment, ExperimentError> {
        let experiment = self.get(id)?;
        if experiment.is_closed() {
            return Err(ExperimentError::Closed(id.to_string()));
        }
        Ok(experiment)
    }

    /// Analyze a metrics snapshot restricted to the experiment's variants.
    fn analyze_snapshot(
        &self,
        experiment: &Experiment,
        raw: &[RawVariantCounters],
    ) -> ExperimentResults {
        let mut present = HashSet::new();
        let mut snapshot = Vec::with_capacity(raw.len());

        for counters in raw {
            let Some(variant) = experiment.variant(&counters.variant_id) else {
                tracing::warn!(
                    experiment_id = %experiment.id,
                    variant_id = %counters.variant_id,
                    "ignoring metrics for unknown variant"
                );
                continue;
            };
            present.insert(variant.id.as_str());
            let mut counters = counters.clone();
            if counters.name.is_none() {
                counters.name = Some(variant.name.clone());
            }
            snapshot.push(counters);
        }

        let mut results = self.analyzer.analyze_raw(
            &snapshot,
            experiment.objective,
            experiment.confidence_level,
        );
        results.experiment_id = Some(experiment.id.clone());
        results.missing_variants = experiment
            .variants
            .iter()
            .filter(|v| !present.contains(v.id.as_str()))
            .map(|v| v.id.clone())
            .collect();
        results.progress = Some(progress_at(experiment, now_ms()));
        results
    }

    fn dispatch(&self, experiment: &Experiment, requests: &[ActionRequest]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for request in requests {
            match self.control.execute(experiment, request) {
                Ok(()) => report.dispatched.push(request.clone()),
                Err(e) => {
                    tracing::error!(
                        experiment_id = %experiment.id,
                        variant_id = %request.variant_id,
                        action = ?request.action,
                        "campaign action failed: {}",
                        e
                    );
                    report.failures.push(DispatchFailure {
                        request: request.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Complete the experiment, then send `actions` unless `dry_run`.
    fn complete_and_dispatch(
        &self,
        id: &str,
        actions: &[ActionRequest],
        dry_run: bool,
    ) -> Result<(Experiment, Option<DispatchReport>), ExperimentError> {
        let completed = self.complete(id)?;
        let dispatch = if dry_run {
            tracing::info!(experiment_id = %id, actions = actions.len(), "dry run: actions not dispatched");
            None
        } else {
            Some(self.dispatch(&completed, actions))
        };
        Ok((completed, dispatch))
    }

    /// Analysis plus recommendation. Completes the experiment only when
    /// `auto_apply` is set and the recommendation is `apply_and_end`.
    pub fn evaluate(
        &self,
        id: &str,
        raw: &[RawVariantCounters],
        options: &EvaluationOptions,
    ) -> Result<Evaluation, ExperimentError> {
        let experiment = self.open_experiment(id)?;
        let results = self.analyze_snapshot(&experiment, raw);
        let recommendation = self.analyzer.recommend(&results, options.winner_action);
        let actions = recommendation.action_requests(&experiment);

        if options.auto_apply && recommendation.completes_experiment() {
            let (experiment, dispatch) = self.complete_and_dispatch(id, &actions, options.dry_run)?;
            return Ok(Evaluation {
                experiment,
                results,
                recommendation,
                actions,
                dispatch,
                completed: true,
            });
        }

        Ok(Evaluation {
            experiment,
            results,
            recommendation,
            actions,
            dispatch: None,
            completed: false,
        })
    }

    /// Always completes. Exactly one of several concurrent calls succeeds;
    /// the rest fail with [`ExperimentError::Closed`].
    pub fn end(
        &self,
        id: &str,
        raw: &[RawVariantCounters],
        options: &EvaluationOptions,
    ) -> Result<Evaluation, ExperimentError> {
        let experiment = self.open_experiment(id)?;
        let results = self.analyze_snapshot(&experiment, raw);
        let recommendation = self.analyzer.recommend(&results, options.winner_action);
        let actions = recommendation.action_requests(&experiment);

        let (experiment, dispatch) = self.complete_and_dispatch(id, &actions, options.dry_run)?;
        Ok(Evaluation {
            experiment,
            results,
            recommendation,
            actions,
            dispatch,
            completed: true,
        })
    }

    /// Completes and dispatches only when the analysis finds a winner;
    /// otherwise returns the analysis with no state change.
    pub fn apply_winner(
        &self,
        id: &str,
        raw: &[RawVariantCounters],
        options: &EvaluationOptions,
    ) -> Result<Evaluation, ExperimentError> {
        let experiment = self.open_experiment(id)?;
        let results = self.analyze_snapshot(&experiment, raw);
        let recommendation = self.analyzer.recommend(&results, options.winner_action);
        let actions = recommendation.action_requests(&experiment);

        if results.winner.is_none() {
            tracing::info!(experiment_id = %id, outcome = ?results.outcome, "no winner to apply");
            return Ok(Evaluation {
                experiment,
                results,
                recommendation,
                actions,
                dispatch: None,
                completed: false,
            });
        }

        let (experiment, dispatch) = self.complete_and_dispatch(id, &actions, options.dry_run)?;
        Ok(Evaluation {
            experiment,
            results,
            recommendation,
            actions,
            dispatch,
            completed: true,
        })
    }
}
