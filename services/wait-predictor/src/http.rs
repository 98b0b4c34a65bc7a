//! Thin axum layer over the predictor and the vision estimator.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::VisionConfig;
use crate::predictor::{PredictError, PredictionRequest, PredictionResponse, RetrainError, RetrainOutcome, WaitTimePredictor};
use crate::vision::{QueueSizeEstimator, VisionError};

/// Upper bound on uploaded image size.
const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<WaitTimePredictor>,
    pub estimator: Arc<QueueSizeEstimator>,
    pub vision: VisionConfig,
}

#[derive(Debug)]
pub enum ApiError {
    Predict(PredictError),
    Retrain(RetrainError),
    Vision(VisionError),
    /// Body or query string that could not be extracted.
    BadRequest(String),
    Internal(String),
}

impl From<PredictError> for ApiError {
    fn from(e: PredictError) -> Self { ApiError::Predict(e) }
}

impl From<RetrainError> for ApiError {
    fn from(e: RetrainError) -> Self { ApiError::Retrain(e) }
}

impl From<VisionError> for ApiError {
    fn from(e: VisionError) -> Self { ApiError::Vision(e) }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self { ApiError::BadRequest(e.body_text()) }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self { ApiError::BadRequest(e.body_text()) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Predict(PredictError::InvalidInput(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Predict(PredictError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Predict(PredictError::Failed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Retrain(RetrainError::UnknownModelType(_)) => StatusCode::BAD_REQUEST,
            ApiError::Retrain(RetrainError::Training(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Vision(VisionError::Decode(_)) => StatusCode::BAD_REQUEST,
            ApiError::Vision(VisionError::InvalidParameter(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Vision(VisionError::DetectorUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Vision(VisionError::Detector(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            ApiError::Predict(e) => e.to_string(),
            ApiError::Retrain(e) => e.to_string(),
            ApiError::Vision(e) => e.to_string(),
            ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg.clone(),
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "request failed");
        }
        (status, Json(json!({ "status": "error", "error": message }))).into_response()
    }
}

/// Run CPU-bound work off the async workers.
async fn blocking<T, E, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))?
        .map_err(Into::into)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/train", post(train))
        .route("/estimate-queue-size", post(estimate_queue_size).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)))
        .with_state(state)
        .merge(waitline_core::health_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Wait Time Predictor API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/predict": "POST - Predict wait time",
            "/train": "POST - Retrain model",
            "/estimate-queue-size": "POST - Count people in an image",
            "/health": "GET - Health check"
        }
    }))
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    model_loaded: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    let model_loaded = state.predictor.is_healthy();
    Json(HealthBody { status: if model_loaded { "healthy" } else { "unhealthy" }, model_loaded })
}

async fn predict(
    State(state): State<AppState>,
    request: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(request) = request?;
    let predictor = Arc::clone(&state.predictor);
    let response = blocking(move || predictor.predict(&request)).await?;
    waitline_core::mark_ready();
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct TrainParams {
    model_type: Option<String>,
}

async fn train(
    State(state): State<AppState>,
    params: Result<Query<TrainParams>, QueryRejection>,
) -> Result<Json<RetrainOutcome>, ApiError> {
    let Query(params) = params?;
    let model_type = params.model_type.unwrap_or_else(|| "linear".to_string());
    let predictor = Arc::clone(&state.predictor);
    let outcome = blocking(move || predictor.retrain(&model_type)).await?;
    waitline_core::mark_ready();
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct EstimateParams {
    conf_threshold: Option<f32>,
    max_people: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EstimateBody {
    queue_size: usize,
}

async fn estimate_queue_size(
    State(state): State<AppState>,
    params: Result<Query<EstimateParams>, QueryRejection>,
    body: Bytes,
) -> Result<Json<EstimateBody>, ApiError> {
    let Query(params) = params?;
    let conf = params.conf_threshold.unwrap_or(state.vision.conf_threshold);
    let max_people = params.max_people.unwrap_or(state.vision.max_people);
    let estimator = Arc::clone(&state.estimator);
    let queue_size = blocking(move || estimator.estimate(&body, conf, max_people)).await?;
    Ok(Json(EstimateBody { queue_size }))
}
