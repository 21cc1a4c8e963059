use adsplit::{
    experiments::lifecycle::Evaluation, ConfidenceLevel, EvaluationOptions, Experiment,
    ExperimentError, ExperimentFilter, ExperimentResults, ExperimentStatus, Objective,
    PlanRequest, RawVariantCounters, Recommendation, WinnerAction,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;
const DEFAULT_LIST_OFFSET: usize = 0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExperimentsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExperimentsResponse {
    pub experiments: Vec<Experiment>,
    pub count: usize,
    pub total: usize,
}

/// Body of results / end / apply-winner calls: a metrics snapshot plus
/// evaluation options at the top level.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub metrics: Vec<RawVariantCounters>,
    #[serde(flatten)]
    pub options: EvaluationOptions,
}

fn default_confidence_level() -> u32 {
    ConfidenceLevel::default().percent()
}

/// Offline analysis of a snapshot with no registered experiment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub objective: Objective,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: u32,
    #[serde(default)]
    pub winner_action: WinnerAction,
    pub metrics: Vec<RawVariantCounters>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub results: ExperimentResults,
    pub recommendation: Recommendation,
}

fn experiment_error_to_response(err: ExperimentError) -> Response {
    (
        err.status_code(),
        Json(serde_json::json!({ "message": err.to_string() })),
    )
        .into_response()
}

fn evaluation_to_response(result: Result<Evaluation, ExperimentError>) -> Response {
    match result {
        Ok(evaluation) => Json(evaluation).into_response(),
        Err(err) => experiment_error_to_response(err),
    }
}

fn parse_status_filter(value: &str) -> Result<ExperimentStatus, ExperimentError> {
    match value.to_ascii_lowercase().as_str() {
        "running" => Ok(ExperimentStatus::Running),
        "paused" => Ok(ExperimentStatus::Paused),
        "completed" => Ok(ExperimentStatus::Completed),
        _ => Err(ExperimentError::InvalidConfig(format!(
            "invalid status filter: {value}"
        ))),
    }
}

pub async fn create_experiment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlanRequest>,
) -> Response {
    match state.controller.create(&body) {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => experiment_error_to_response(err),
    }
}

pub async fn list_experiments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListExperimentsQuery>,
) -> Response {
    let status = match params.status.as_deref() {
        Some(status) => match parse_status_filter(status) {
            Ok(parsed) => Some(parsed),
            Err(err) => return experiment_error_to_response(err),
        },
        None => None,
    };

    let experiments = state.controller.list(&ExperimentFilter { status });

    let total = experiments.len();
    let offset = params.offset.unwrap_or(DEFAULT_LIST_OFFSET);
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let page: Vec<Experiment> = experiments.into_iter().skip(offset).take(limit).collect();
    let count = page.len();

    Json(ListExperimentsResponse {
        experiments: page,
        count,
        total,
    })
    .into_response()
}

pub async fn get_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.controller.get(&id) {
        Ok(experiment) => Json(experiment).into_response(),
        Err(err) => experiment_error_to_response(err),
    }
}

pub async fn pause_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.controller.pause(&id) {
        Ok(experiment) => Json(experiment).into_response(),
        Err(err) => experiment_error_to_response(err),
    }
}

pub async fn resume_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.controller.resume(&id) {
        Ok(experiment) => Json(experiment).into_response(),
        Err(err) => experiment_error_to_response(err),
    }
}

pub async fn get_experiment_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<EvaluateRequest>,
) -> Response {
    evaluation_to_response(state.controller.evaluate(&id, &body.metrics, &body.options))
}

pub async fn end_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<EvaluateRequest>,
) -> Response {
    evaluation_to_response(state.controller.end(&id, &body.metrics, &body.options))
}

pub async fn apply_winner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<EvaluateRequest>,
) -> Response {
    evaluation_to_response(
        state
            .controller
            .apply_winner(&id, &body.metrics, &body.options),
    )
}

pub async fn analyze_metrics(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnalyzeRequest>,
) -> Response {
    let confidence_level = match ConfidenceLevel::try_from(body.confidence_level) {
        Ok(level) => level,
        Err(err) => return experiment_error_to_response(err),
    };
    if body.metrics.is_empty() {
        return experiment_error_to_response(ExperimentError::InvalidConfig(
            "metrics must not be empty".to_string(),
        ));
    }

    let analyzer = state.controller.analyzer();
    let results = analyzer.analyze_raw(&body.metrics, body.objective, confidence_level);
    let recommendation = analyzer.recommend(&results, body.winner_action);

    Json(AnalyzeResponse {
        results,
        recommendation,
    })
    .into_response()
}
