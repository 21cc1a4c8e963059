//! Experiment analysis: ranking, leader-vs-field significance, winner
//! selection and the resulting recommendation.
//!
//! Everything here is a pure function of its inputs. [`ExperimentResults`]
//! are recomputed on every evaluation and never stored.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::config::{
    ConfidenceLevel, Direction, EngineConfig, Experiment, Objective, WinnerAction,
};
use super::metrics::{normalize, RawVariantCounters, VariantMetrics};
use super::ranking::rank;
use super::stats::{
    compare, compare_all_pairs, round_to, sample_size_needed, Comparison, ComparisonNote,
    TestInput,
};

// ── Result Structs ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentOutcome {
    WinnerFound,
    /// Some leader comparisons are significant, but not all of them.
    PartialSignificance,
    /// Fewer than two eligible variants, or an ineligible leader.
    InsufficientData,
    NoSignificantDifference,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantResult {
    #[serde(flatten)]
    pub metrics: VariantMetrics,
    /// 1-based position in the ranking.
    pub rank: usize,
    pub primary_metric: Option<f64>,
    /// Defined primary metric and at least the minimum viable sample.
    pub eligible: bool,
    pub is_winner: bool,
    /// Against the leader; for the leader, the weakest of its comparisons.
    pub p_value: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WinnerSummary {
    pub variant_id: String,
    pub name: Option<String>,
    /// Against the runner-up.
    pub lift_percent: Option<f64>,
    pub confidence: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RejectedVariant {
    pub variant_id: String,
    pub reason: String,
}

/// Elapsed time against the scheduled duration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub elapsed_days: f64,
    pub duration_days: u32,
    pub percent_complete: f64,
    pub past_scheduled_end: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResults {
    pub experiment_id: Option<String>,
    pub objective: Objective,
    pub direction: Direction,
    pub confidence_level: ConfidenceLevel,
    pub alpha: f64,
    pub outcome: ExperimentOutcome,
    pub leader: Option<String>,
    pub winner: Option<WinnerSummary>,
    pub statistical_significance: bool,
    /// Best first.
    pub variants: Vec<VariantResult>,
    pub leader_comparisons: Vec<Comparison>,
    pub comparisons: Vec<Comparison>,
    pub rejected: Vec<RejectedVariant>,
    pub missing_variants: Vec<String>,
    pub progress: Option<Progress>,
}

impl ExperimentResults {
    pub fn variant(&self, id: &str) -> Option<&VariantResult> {
        self.variants.iter().find(|v| v.metrics.variant_id == id)
    }

    pub fn loser_ids(&self) -> Vec<String> {
        self.variants
            .iter()
            .filter(|v| !v.is_winner)
            .map(|v| v.metrics.variant_id.clone())
            .collect()
    }
}

// ── Recommendation ──────────────────────────────────────────────────

/// An inconclusive comparison and the per-arm trials it still needs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingComparison {
    pub variant_a: String,
    pub variant_b: String,
    pub p_value: f64,
    pub note: Option<ComparisonNote>,
    pub trials_a: u64,
    pub trials_b: u64,
    pub sample_size_needed: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecommendedAction {
    #[serde(rename_all = "camelCase")]
    ScaleBudget {
        winner_id: String,
        lift_percent: Option<f64>,
        scale_percent: f64,
        loser_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    PauseLosers {
        winner_id: String,
        loser_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    ApplyAndEnd {
        winner_id: String,
        loser_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    ReportOnly {
        winner_id: Option<String>,
        pending: Vec<PendingComparison>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    #[serde(flatten)]
    pub action: RecommendedAction,
    pub rationale: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Pause,
    ScaleBudget,
}

/// Outbound instruction for the campaign-control collaborator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub variant_id: String,
    pub entity_ref: String,
    pub action: ActionKind,
    /// Budget increase in percent for `scale_budget`.
    pub magnitude: Option<f64>,
}

impl Recommendation {
    pub fn is_report_only(&self) -> bool {
        matches!(self.action, RecommendedAction::ReportOnly { .. })
    }

    /// Whether carrying out this recommendation ends the experiment.
    pub fn completes_experiment(&self) -> bool {
        matches!(self.action, RecommendedAction::ApplyAndEnd { .. })
    }

    pub fn winner_id(&self) -> Option<&str> {
        match &self.action {
            RecommendedAction::ScaleBudget { winner_id, .. }
            | RecommendedAction::PauseLosers { winner_id, .. }
            | RecommendedAction::ApplyAndEnd { winner_id, .. } => Some(winner_id),
            RecommendedAction::ReportOnly { winner_id, .. } => winner_id.as_deref(),
        }
    }

    /// Resolve the recommendation into per-entity requests against
    /// `experiment`'s variants. Ids the experiment does not know are skipped.
    pub fn action_requests(&self, experiment: &Experiment) -> Vec<ActionRequest> {
        let request = |id: &str, action: ActionKind, magnitude: Option<f64>| {
            experiment.variant(id).map(|v| ActionRequest {
                variant_id: v.id.clone(),
                entity_ref: v.entity_ref.clone(),
                action,
                magnitude,
            })
        };
        let pauses = |loser_ids: &[String]| -> Vec<ActionRequest> {
            loser_ids
                .iter()
                .filter_map(|id| request(id.as_str(), ActionKind::Pause, None))
                .collect()
        };

        match &self.action {
            RecommendedAction::ScaleBudget {
                winner_id,
                scale_percent,
                loser_ids,
                ..
            } => {
                let mut requests: Vec<ActionRequest> =
                    request(winner_id.as_str(), ActionKind::ScaleBudget, Some(*scale_percent))
                        .into_iter()
                        .collect();
                requests.extend(pauses(loser_ids));
                requests
            }
            RecommendedAction::PauseLosers { loser_ids, .. }
            | RecommendedAction::ApplyAndEnd { loser_ids, .. } => pauses(loser_ids),
            RecommendedAction::ReportOnly { .. } => Vec::new(),
        }
    }
}

// ── Analyzer ────────────────────────────────────────────────────────

fn confidence_from_p(p: f64) -> f64 {
    round_to((1.0 - p) * 100.0, 2)
}

fn display_name(metrics: &VariantMetrics) -> &str {
    metrics.name.as_deref().unwrap_or(&metrics.variant_id)
}

fn format_lift(lift: Option<f64>) -> String {
    match lift {
        Some(l) => format!("{l:+.2}%"),
        None => "n/a".to_string(),
    }
}

/// Stateless analysis engine parameterized by an [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: EngineConfig,
}

impl Analyzer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn is_eligible(&self, metrics: &VariantMetrics, objective: Objective) -> bool {
        TestInput::for_objective(metrics, objective)
            .is_some_and(|input| input.trials() >= self.config.min_sample_per_arm)
    }

    /// Rank, test the leader against the field and decide whether it wins.
    pub fn analyze(
        &self,
        variants: Vec<VariantMetrics>,
        objective: Objective,
        confidence_level: ConfidenceLevel,
    ) -> ExperimentResults {
        let alpha = confidence_level.alpha();
        let min_sample = self.config.min_sample_per_arm;
        let order = rank(&variants, objective);

        let leader_idx = order
            .first()
            .copied()
            .filter(|&i| variants[i].metric(objective).is_some());
        let eligible: Vec<bool> = variants
            .iter()
            .map(|v| self.is_eligible(v, objective))
            .collect();

        let leader_comparisons: Vec<Comparison> = match leader_idx {
            Some(l) => order[1..]
                .iter()
                .filter_map(|&j| compare(&variants[l], &variants[j], objective, alpha, min_sample))
                .collect(),
            None => Vec::new(),
        };
        let comparisons = compare_all_pairs(&variants, &order, objective, alpha, min_sample);

        let eligible_ids: HashSet<&str> = variants
            .iter()
            .zip(&eligible)
            .filter(|&(_, &e)| e)
            .map(|(v, _)| v.variant_id.as_str())
            .collect();
        let against_eligible: Vec<&Comparison> = leader_comparisons
            .iter()
            .filter(|c| eligible_ids.contains(c.variant_b.as_str()))
            .collect();

        let leader_eligible = leader_idx.is_some_and(|l| eligible[l]);
        let has_winner = leader_eligible
            && !against_eligible.is_empty()
            && against_eligible.iter().all(|c| c.significant);

        let outcome = if !leader_eligible || eligible_ids.len() < 2 {
            ExperimentOutcome::InsufficientData
        } else if has_winner {
            ExperimentOutcome::WinnerFound
        } else if against_eligible.iter().any(|c| c.significant) {
            ExperimentOutcome::PartialSignificance
        } else {
            ExperimentOutcome::NoSignificantDifference
        };

        let leader_p = against_eligible
            .iter()
            .map(|c| c.p_value)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));

        let winner = match (has_winner, leader_idx, leader_p) {
            (true, Some(l), Some(p)) => Some(WinnerSummary {
                variant_id: variants[l].variant_id.clone(),
                name: variants[l].name.clone(),
                lift_percent: against_eligible.first().and_then(|c| c.lift_percent),
                confidence: confidence_from_p(p),
            }),
            _ => None,
        };

        let variant_results: Vec<VariantResult> = order
            .iter()
            .enumerate()
            .map(|(pos, &i)| {
                let metrics = &variants[i];
                let is_leader = Some(i) == leader_idx;
                let p_value = if is_leader {
                    leader_p
                } else {
                    leader_comparisons
                        .iter()
                        .find(|c| c.variant_b == metrics.variant_id)
                        .map(|c| c.p_value)
                };
                VariantResult {
                    metrics: metrics.clone(),
                    rank: pos + 1,
                    primary_metric: metrics.metric(objective),
                    eligible: eligible[i],
                    is_winner: is_leader && has_winner,
                    p_value,
                    confidence: p_value.map(confidence_from_p),
                }
            })
            .collect();

        tracing::debug!(
            objective = ?objective,
            confidence = confidence_level.percent(),
            variants = variant_results.len(),
            outcome = ?outcome,
            "analyzed experiment"
        );

        ExperimentResults {
            experiment_id: None,
            objective,
            direction: objective.direction(),
            confidence_level,
            alpha,
            outcome,
            leader: leader_idx.map(|l| variants[l].variant_id.clone()),
            winner,
            statistical_significance: has_winner,
            variants: variant_results,
            leader_comparisons,
            comparisons,
            rejected: Vec::new(),
            missing_variants: Vec::new(),
            progress: None,
        }
    }

    /// Normalize then analyze. Variants failing normalization, and repeated
    /// variant ids, are reported in `rejected` instead of failing the batch.
    pub fn analyze_raw(
        &self,
        raw: &[RawVariantCounters],
        objective: Objective,
        confidence_level: ConfidenceLevel,
    ) -> ExperimentResults {
        let mut seen = HashSet::new();
        let mut metrics = Vec::with_capacity(raw.len());
        let mut rejected = Vec::new();

        for counters in raw {
            if !seen.insert(counters.variant_id.as_str()) {
                tracing::warn!(variant_id = %counters.variant_id, "duplicate variant in metrics snapshot");
                rejected.push(RejectedVariant {
                    variant_id: counters.variant_id.clone(),
                    reason: "duplicate variant id".to_string(),
                });
                continue;
            }
            match normalize(counters) {
                Ok(m) => metrics.push(m),
                Err(e) => {
                    tracing::warn!(variant_id = %counters.variant_id, "rejected variant metrics: {}", e);
                    rejected.push(RejectedVariant {
                        variant_id: counters.variant_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut results = self.analyze(metrics, objective, confidence_level);
        results.rejected = rejected;
        results
    }

    /// Map results and the caller's winner-action policy to a recommendation.
    pub fn recommend(&self, results: &ExperimentResults, policy: WinnerAction) -> Recommendation {
        let objective_label = results.objective.label();
        let confidence = results.confidence_level;

        if let Some(winner) = &results.winner {
            let winner_name = results
                .variant(&winner.variant_id)
                .map(|v| display_name(&v.metrics).to_string())
                .unwrap_or_else(|| winner.variant_id.clone());
            let loser_ids = results.loser_ids();
            let headline = format!(
                "{} wins on {} at {} confidence ({:.2}% observed, lift {} vs runner-up).",
                winner_name,
                objective_label,
                confidence,
                winner.confidence,
                format_lift(winner.lift_percent)
            );

            return match policy {
                WinnerAction::ScaleBudget => {
                    let scale_percent = self.config.default_scale_percent;
                    Recommendation {
                        rationale: format!(
                            "{headline} Scale its budget by {scale_percent}% and pause {} losing variant(s).",
                            loser_ids.len()
                        ),
                        action: RecommendedAction::ScaleBudget {
                            winner_id: winner.variant_id.clone(),
                            lift_percent: winner.lift_percent,
                            scale_percent,
                            loser_ids,
                        },
                    }
                }
                WinnerAction::PauseLosers => Recommendation {
                    rationale: format!(
                        "{headline} Pause {} losing variant(s).",
                        loser_ids.len()
                    ),
                    action: RecommendedAction::PauseLosers {
                        winner_id: winner.variant_id.clone(),
                        loser_ids,
                    },
                },
                WinnerAction::ApplyAndEnd => Recommendation {
                    rationale: format!(
                        "{headline} Keep the winner, pause {} losing variant(s) and end the experiment.",
                        loser_ids.len()
                    ),
                    action: RecommendedAction::ApplyAndEnd {
                        winner_id: winner.variant_id.clone(),
                        loser_ids,
                    },
                },
                WinnerAction::ReportOnly => Recommendation {
                    rationale: format!("{headline} No changes requested."),
                    action: RecommendedAction::ReportOnly {
                        winner_id: Some(winner.variant_id.clone()),
                        pending: Vec::new(),
                    },
                },
            };
        }

        let pending = self.pending_comparisons(results);
        let mut rationale = match results.outcome {
            ExperimentOutcome::InsufficientData => format!(
                "Not enough data to call {} at {} confidence: each variant needs at least {} trials.",
                objective_label, confidence, self.config.min_sample_per_arm
            ),
            ExperimentOutcome::PartialSignificance => format!(
                "The leader is ahead on {} but not significantly against every variant at {} confidence. Keep the test running.",
                objective_label, confidence
            ),
            _ => format!(
                "No significant difference on {} at {} confidence.",
                objective_label, confidence
            ),
        };
        for p in &pending {
            let needed = match (p.sample_size_needed, p.note) {
                (Some(n), _) => format!("~{n} trials per arm needed"),
                (None, Some(ComparisonNote::DirectionMismatch)) => format!(
                    "the tested rate favours {}, so {} cannot be called the winner",
                    p.variant_b, p.variant_a
                ),
                (None, _) => "no observed difference".to_string(),
            };
            rationale.push_str(&format!(
                " {} vs {}: p={:.4}, {} vs {} trials, {}.",
                p.variant_a, p.variant_b, p.p_value, p.trials_a, p.trials_b, needed
            ));
        }

        Recommendation {
            action: RecommendedAction::ReportOnly {
                winner_id: None,
                pending,
            },
            rationale,
        }
    }

    fn pending_comparisons(&self, results: &ExperimentResults) -> Vec<PendingComparison> {
        let input = |id: &str| {
            results
                .variant(id)
                .and_then(|v| TestInput::for_objective(&v.metrics, results.objective))
        };

        results
            .leader_comparisons
            .iter()
            .filter(|c| !c.significant)
            .map(|c| {
                let sample_size_needed = match (input(&c.variant_a), input(&c.variant_b)) {
                    // More data would only confirm the rate favours variant_b.
                    _ if c.note == Some(ComparisonNote::DirectionMismatch) => None,
                    (Some(a), Some(b)) => sample_size_needed(
                        &a,
                        &b,
                        results.alpha,
                        self.config.power,
                        self.config.min_sample_per_arm,
                    ),
                    _ => None,
                };
                PendingComparison {
                    variant_a: c.variant_a.clone(),
                    variant_b: c.variant_b.clone(),
                    p_value: c.p_value,
                    note: c.note,
                    trials_a: c.trials_a,
                    trials_b: c.trials_b,
                    sample_size_needed,
                }
            })
            .collect()
    }
}
