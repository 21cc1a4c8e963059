use adsplit::LifecycleController;
use std::sync::Arc;

pub mod experiments;
pub mod health;

pub struct AppState {
    pub controller: Arc<LifecycleController>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(controller: Arc<LifecycleController>) -> Self {
        Self {
            controller,
            start_time: std::time::Instant::now(),
        }
    }
}

pub use experiments::{
    analyze_metrics, apply_winner, create_experiment, end_experiment, get_experiment,
    get_experiment_results, list_experiments, pause_experiment, resume_experiment,
};
pub use health::health;
