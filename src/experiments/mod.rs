pub mod analyzer;
pub mod config;
pub mod lifecycle;
pub mod metrics;
pub mod plan;
pub mod ranking;
pub mod stats;
