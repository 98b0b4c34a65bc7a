//! Trained-model capability shared by the linear and forest regressors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod forest;
pub mod linear;

pub use forest::{ForestModel, ForestParams};
pub use linear::LinearModel;

/// Features are always `[queue_size, avg_service_time, arrival_rate]`.
pub const FEATURE_COUNT: usize = 3;

pub fn feature_vector(queue_size: u32, avg_service_time: f64, arrival_rate: f64) -> [f64; FEATURE_COUNT] {
    [f64::from(queue_size), avg_service_time, arrival_rate]
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("expected {expected} features, got {got}")]
    FeatureShape { expected: usize, got: usize },
    #[error("model produced non-finite output {0}")]
    NonFinite(f64),
    #[error("malformed tree: {0}")]
    MalformedTree(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("no training rows")]
    Empty,
    #[error("feature/target length mismatch: {rows} rows, {targets} targets")]
    LengthMismatch { rows: usize, targets: usize },
    #[error("normal equations are singular")]
    Singular,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown model type '{0}', expected 'linear' or 'random_forest'")]
pub struct UnknownModelType(pub String);

/// Maps a feature vector to a waiting time in seconds.
pub trait WaitModel: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError>;
}

pub(crate) fn check_shape(features: &[f64]) -> Result<(), ModelError> {
    if features.len() != FEATURE_COUNT {
        return Err(ModelError::FeatureShape { expected: FEATURE_COUNT, got: features.len() });
    }
    Ok(())
}

pub(crate) fn check_output(value: f64) -> Result<f64, ModelError> {
    if value.is_finite() { Ok(value) } else { Err(ModelError::NonFinite(value)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    RandomForest,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::RandomForest => "random_forest",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ModelKind {
    type Err = UnknownModelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(ModelKind::Linear),
            "random_forest" => Ok(ModelKind::RandomForest),
            other => Err(UnknownModelType(other.to_string())),
        }
    }
}

/// A fitted model of either family. This is what the registry persists and
/// what the predictor holds as its active model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum TrainedModel {
    Linear(LinearModel),
    RandomForest(ForestModel),
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::Linear(_) => ModelKind::Linear,
            TrainedModel::RandomForest(_) => ModelKind::RandomForest,
        }
    }
}

impl WaitModel for TrainedModel {
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        match self {
            TrainedModel::Linear(m) => m.predict(features),
            TrainedModel::RandomForest(m) => m.predict(features),
        }
    }
}
