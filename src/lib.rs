//! Decision engine for advertising A/B experiments.
//!
//! Raw per-variant counters are normalized ([`experiments::metrics`]), ranked
//! by the experiment's objective ([`experiments::ranking`]), tested pairwise
//! for significance ([`experiments::stats`]) and turned into a winner decision
//! and recommendation ([`experiments::analyzer`]). Experiments are created by
//! the plan builder ([`experiments::plan`]) and their status is owned by the
//! [`LifecycleController`].

pub mod experiments;

pub use experiments::analyzer::{
    ActionKind, ActionRequest, Analyzer, ExperimentOutcome, ExperimentResults, Recommendation,
    RecommendedAction,
};
pub use experiments::config::{
    ConfidenceLevel, EngineConfig, Experiment, ExperimentError, ExperimentStatus, Objective,
    TestVariable, Variant, WinnerAction,
};
pub use experiments::lifecycle::{
    CampaignControl, DryRunCampaignControl, Evaluation, EvaluationOptions, ExperimentFilter,
    LifecycleController,
};
pub use experiments::metrics::{normalize, RawVariantCounters, VariantMetrics};
pub use experiments::plan::{build_plan, PlanRequest};
