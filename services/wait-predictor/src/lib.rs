//! Queue wait-time prediction pipeline.
//!
//! Synthetic data -> dataset cache -> trainer -> model registry -> predictor,
//! plus an image-based queue-size estimator feeding the same predictor.

pub mod config;
pub mod dataset;
pub mod http;
pub mod model;
pub mod predictor;
pub mod registry;
pub mod simulation;
pub mod train;
pub mod vision;

/// Seed shared by simulation, the train/test split and the forest.
pub const RANDOM_SEED: u64 = 42;

pub use config::{ServiceConfig, VisionConfig};
pub use dataset::{load_or_generate, Dataset, QueueObservation};
pub use model::{ModelKind, TrainedModel, WaitModel, FEATURE_COUNT};
pub use predictor::{PredictionRequest, PredictionResponse, RetrainOutcome, WaitTimePredictor};
pub use simulation::SimulationParams;
pub use train::{train, train_and_save, TrainReport, TrainingOutcome};
pub use vision::{QueueSizeEstimator, DEFAULT_CONF_THRESHOLD, DEFAULT_MAX_PEOPLE};
