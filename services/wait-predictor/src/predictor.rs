//! Service-facing predictor: owns the active model and its replacement.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use waitline_core::{record_prediction, record_retrain, PredictionOutcome};

use crate::config::ServiceConfig;
use crate::model::{feature_vector, ModelError, ModelKind, TrainedModel, UnknownModelType, WaitModel};
use crate::registry;
use crate::train::{train_and_save, TrainError};

/// People per minute assumed when the caller gives no arrival rate.
pub const DEFAULT_ARRIVAL_RATE: f64 = 2.0;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("model not available: {0}")]
    Unavailable(#[source] TrainError),
    #[error("Prediction failed: {0}")]
    Failed(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum RetrainError {
    #[error(transparent)]
    UnknownModelType(#[from] UnknownModelType),
    #[error("training failed: {0}")]
    Training(#[source] TrainError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub queue_size: u32,
    /// Seconds per person.
    pub avg_service_time: f64,
    /// People per minute.
    #[serde(default)]
    pub arrival_rate: Option<f64>,
}

impl PredictionRequest {
    fn validate(&self) -> Result<(), PredictError> {
        if self.queue_size == 0 {
            return Err(PredictError::InvalidInput("queue_size must be greater than 0".into()));
        }
        if !(self.avg_service_time.is_finite() && self.avg_service_time > 0.0) {
            return Err(PredictError::InvalidInput("avg_service_time must be a positive number".into()));
        }
        if let Some(rate) = self.arrival_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(PredictError::InvalidInput("arrival_rate must be a positive number".into()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predicted_wait_time_seconds: f64,
    pub predicted_wait_time_minutes: f64,
    pub queue_size: u32,
    pub avg_service_time: f64,
    /// Echo of the caller's rate; `None` when the default was used.
    pub arrival_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainOutcome {
    pub status: &'static str,
    pub model_type: ModelKind,
    pub r2_score: f64,
    pub mse: f64,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Holds the process-wide active model. Readers take a snapshot `Arc`
/// without locking; writers (bootstrap, retrain) serialise on `writer` and
/// publish a finished model with a single store.
pub struct WaitTimePredictor {
    active: ArcSwapOption<TrainedModel>,
    writer: Mutex<()>,
    data_path: PathBuf,
    model_path: PathBuf,
    bootstrap_kind: ModelKind,
}

impl WaitTimePredictor {
    pub fn new(data_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            active: ArcSwapOption::empty(),
            writer: Mutex::new(()),
            data_path: data_path.into(),
            model_path: model_path.into(),
            bootstrap_kind: ModelKind::Linear,
        }
    }

    pub fn from_config(cfg: &ServiceConfig) -> Self {
        Self::new(&cfg.data_path, &cfg.model_path).with_bootstrap_kind(cfg.bootstrap_model_type)
    }

    pub fn with_bootstrap_kind(mut self, kind: ModelKind) -> Self {
        self.bootstrap_kind = kind;
        self
    }

    pub fn model_path(&self) -> &Path { &self.model_path }

    pub fn active_model(&self) -> Option<Arc<TrainedModel>> {
        self.active.load_full()
    }

    /// Return the active model, loading the artifact or training and saving
    /// a bootstrap model first if needed.
    pub fn ensure_model(&self) -> Result<Arc<TrainedModel>, TrainError> {
        if let Some(model) = self.active.load_full() {
            return Ok(model);
        }
        let _guard = self.writer.lock();
        if let Some(model) = self.active.load_full() {
            return Ok(model);
        }
        let model = match registry::load_model(&self.model_path) {
            Some(model) => model,
            None => {
                info!(path = %self.model_path.display(), model_type = %self.bootstrap_kind, "no usable model artifact, training");
                let outcome = train_and_save(self.bootstrap_kind, &self.data_path, &self.model_path)?;
                info!(r2 = outcome.r2, mse = outcome.mse, "bootstrap model ready");
                outcome.model
            }
        };
        let model = Arc::new(model);
        self.active.store(Some(Arc::clone(&model)));
        Ok(model)
    }

    pub fn predict(&self, request: &PredictionRequest) -> Result<PredictionResponse, PredictError> {
        let started = Instant::now();
        let result = self.predict_inner(request);
        let outcome = match &result {
            Ok(_) => PredictionOutcome::Success,
            Err(PredictError::InvalidInput(_)) => PredictionOutcome::InvalidInput,
            Err(PredictError::Unavailable(_)) => PredictionOutcome::Unavailable,
            Err(PredictError::Failed(_)) => PredictionOutcome::Failed,
        };
        record_prediction(outcome, started.elapsed());
        result
    }

    fn predict_inner(&self, request: &PredictionRequest) -> Result<PredictionResponse, PredictError> {
        request.validate()?;
        let model = self.ensure_model().map_err(PredictError::Unavailable)?;
        let arrival_rate = request.arrival_rate.unwrap_or(DEFAULT_ARRIVAL_RATE);
        let features = feature_vector(request.queue_size, request.avg_service_time, arrival_rate);
        let seconds = model.predict(&features)?.max(0.0);
        Ok(PredictionResponse {
            predicted_wait_time_seconds: round2(seconds),
            predicted_wait_time_minutes: round2(seconds / 60.0),
            queue_size: request.queue_size,
            avg_service_time: request.avg_service_time,
            arrival_rate: request.arrival_rate,
        })
    }

    /// Train, persist and then publish a new model. The type name is checked
    /// before anything else runs; on any failure the active model is untouched.
    pub fn retrain(&self, model_type: &str) -> Result<RetrainOutcome, RetrainError> {
        let kind: ModelKind = model_type.parse()?;
        let _guard = self.writer.lock();
        let started = Instant::now();
        let result = train_and_save(kind, &self.data_path, &self.model_path);
        record_retrain(kind.as_str(), result.is_ok(), started.elapsed());
        let outcome = result.map_err(|e| {
            warn!(model_type = %kind, error = %e, "retrain failed");
            RetrainError::Training(e)
        })?;
        let report = outcome.report();
        self.active.store(Some(Arc::new(outcome.model)));
        info!(model_type = %kind, r2 = report.r2_score, mse = report.mse, "active model replaced");
        Ok(RetrainOutcome { status: "success", model_type: kind, r2_score: report.r2_score, mse: report.mse })
    }

    /// A model is loaded and its artifact is still on disk.
    pub fn is_healthy(&self) -> bool {
        self.active.load().is_some() && registry::model_exists(&self.model_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearModel;
    use crate::registry::save_model;

    fn request(queue_size: u32, avg_service_time: f64, arrival_rate: Option<f64>) -> PredictionRequest {
        PredictionRequest { queue_size, avg_service_time, arrival_rate }
    }

    fn with_fixed_model(dir: &Path, model: LinearModel) -> WaitTimePredictor {
        let model_path = dir.join("model.json");
        save_model(&TrainedModel::Linear(model), &model_path).unwrap();
        WaitTimePredictor::new(dir.join("data.csv"), model_path)
    }

    #[test]
    fn seconds_and_minutes_share_one_value() {
        let dir = tempfile::tempdir().unwrap();
        let p = with_fixed_model(dir.path(), LinearModel::new(0.0, [1.0, 1.0, 0.0]));
        let out = p.predict(&request(50, 120.0, None)).unwrap();
        assert_eq!(out.predicted_wait_time_seconds, 170.0);
        assert_eq!(out.predicted_wait_time_minutes, 2.83);
        assert!(!dir.path().join("data.csv").exists(), "stored model must not trigger training");
    }

    #[test]
    fn negative_output_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let p = with_fixed_model(dir.path(), LinearModel::new(-1000.0, [1.0, 0.0, 0.0]));
        let out = p.predict(&request(5, 60.0, Some(3.0))).unwrap();
        assert_eq!(out.predicted_wait_time_seconds, 0.0);
        assert_eq!(out.predicted_wait_time_minutes, 0.0);
    }

    #[test]
    fn omitted_rate_uses_default_but_echoes_none() {
        let dir = tempfile::tempdir().unwrap();
        let p = with_fixed_model(dir.path(), LinearModel::new(0.0, [0.0, 0.0, 10.0]));
        let omitted = p.predict(&request(3, 60.0, None)).unwrap();
        let explicit = p.predict(&request(3, 60.0, Some(DEFAULT_ARRIVAL_RATE))).unwrap();
        assert_eq!(omitted.predicted_wait_time_seconds, 20.0);
        assert_eq!(omitted.predicted_wait_time_seconds, explicit.predicted_wait_time_seconds);
        assert_eq!(omitted.arrival_rate, None);
        assert_eq!(explicit.arrival_rate, Some(2.0));
    }

    #[test]
    fn invalid_inputs_are_rejected_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let p = WaitTimePredictor::new(dir.path().join("data.csv"), dir.path().join("model.json"));
        for bad in [request(0, 60.0, None), request(3, 0.0, None), request(3, f64::NAN, None), request(3, 60.0, Some(-1.0))] {
            assert!(matches!(p.predict(&bad), Err(PredictError::InvalidInput(_))), "{bad:?}");
        }
        assert!(p.active_model().is_none());
        assert!(!dir.path().join("data.csv").exists());
    }

    #[test]
    fn broken_model_is_a_prediction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let p = with_fixed_model(dir.path(), LinearModel::new(0.0, [f64::MAX, f64::MAX, 0.0]));
        let err = p.predict(&request(10, 100.0, None)).unwrap_err();
        assert!(matches!(err, PredictError::Failed(ModelError::NonFinite(_))));
        assert!(err.to_string().starts_with("Prediction failed"));
        assert!(p.active_model().is_some());
    }

    #[test]
    fn bogus_retrain_leaves_active_model() {
        let dir = tempfile::tempdir().unwrap();
        let p = with_fixed_model(dir.path(), LinearModel::new(7.0, [1.0, 2.0, 3.0]));
        let before = p.ensure_model().unwrap();
        let err = p.retrain("bogus").unwrap_err();
        assert!(matches!(err, RetrainError::UnknownModelType(_)));
        assert!(Arc::ptr_eq(&before, &p.active_model().unwrap()));
        assert!(!dir.path().join("data.csv").exists());
    }

    #[test]
    fn failed_bootstrap_is_unavailable_and_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.csv");
        std::fs::write(&data, "not,the,right,header\n1,2,3,4\n").unwrap();
        let p = WaitTimePredictor::new(&data, dir.path().join("model.json"));
        assert!(matches!(p.predict(&request(3, 60.0, None)), Err(PredictError::Unavailable(_))));
        assert!(!p.is_healthy());
    }

    #[test]
    fn health_tracks_artifact_presence() {
        let dir = tempfile::tempdir().unwrap();
        let p = with_fixed_model(dir.path(), LinearModel::new(1.0, [1.0, 1.0, 1.0]));
        assert!(!p.is_healthy());
        p.ensure_model().unwrap();
        assert!(p.is_healthy());
        std::fs::remove_file(p.model_path()).unwrap();
        assert!(!p.is_healthy());
    }
}
