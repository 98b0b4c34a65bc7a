//! Trainer: split, fit one model family, score on the held-out rows.

use std::path::Path;
use std::time::Instant;

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::dataset::{self, Dataset, DatasetError};
use crate::model::{FitError, ForestModel, ForestParams, LinearModel, ModelError, ModelKind, TrainedModel, WaitModel};
use crate::registry::{self, RegistryError};
use crate::RANDOM_SEED;

/// Fraction of rows held out for scoring.
pub const TEST_FRACTION: f64 = 0.2;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("dataset too small to split: {0} rows")]
    TooSmall(usize),
    #[error("fit failed: {0}")]
    Fit(#[from] FitError),
    #[error("evaluation failed: {0}")]
    Evaluate(#[from] ModelError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A fitted model plus its held-out metrics. The metrics live only here,
/// they are never written into the artifact.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: TrainedModel,
    pub r2: f64,
    pub mse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainReport {
    pub model_type: ModelKind,
    pub r2_score: f64,
    pub mse: f64,
}

impl TrainingOutcome {
    pub fn report(&self) -> TrainReport {
        TrainReport { model_type: self.model.kind(), r2_score: self.r2, mse: self.mse }
    }
}

struct Split {
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    x_test: Array2<f64>,
    y_test: Array1<f64>,
}

/// Seeded shuffle, then the first `ceil(0.2 n)` rows become the test set.
fn split(dataset: &Dataset) -> Result<Split, TrainError> {
    let n = dataset.len();
    let test_len = (n as f64 * TEST_FRACTION).ceil() as usize;
    if test_len == 0 || n < test_len + 2 {
        return Err(TrainError::TooSmall(n));
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(RANDOM_SEED));
    let (test_idx, train_idx) = order.split_at(test_len);

    let (x, y) = (dataset.features(), dataset.targets());
    Ok(Split {
        x_train: x.select(Axis(0), train_idx),
        y_train: y.select(Axis(0), train_idx),
        x_test: x.select(Axis(0), test_idx),
        y_test: y.select(Axis(0), test_idx),
    })
}

fn fit(kind: ModelKind, x: &Array2<f64>, y: &Array1<f64>) -> Result<TrainedModel, FitError> {
    Ok(match kind {
        ModelKind::Linear => TrainedModel::Linear(LinearModel::fit(x.view(), y.view())?),
        ModelKind::RandomForest => {
            TrainedModel::RandomForest(ForestModel::fit(x.view(), y.view(), &ForestParams::default())?)
        }
    })
}

/// `(r2, mse)` of `model` on the given rows. A constant target scores r2 = 1
/// when predicted exactly and 0 otherwise.
fn evaluate(model: &TrainedModel, x: &Array2<f64>, y: &Array1<f64>) -> Result<(f64, f64), ModelError> {
    let mut ss_res = 0.0;
    for (row, target) in x.rows().into_iter().zip(y.iter()) {
        let err = target - model.predict(&row.to_vec())?;
        ss_res += err * err;
    }
    let n = y.len() as f64;
    let mean = y.sum() / n;
    let ss_tot: f64 = y.iter().map(|v| (v - mean) * (v - mean)).sum();
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };
    Ok((r2, ss_res / n))
}

pub fn train_on(kind: ModelKind, dataset: &Dataset) -> Result<TrainingOutcome, TrainError> {
    let split = split(dataset)?;
    let model = fit(kind, &split.x_train, &split.y_train)?;
    let (r2, mse) = evaluate(&model, &split.x_test, &split.y_test)?;
    Ok(TrainingOutcome { model, r2, mse })
}

/// Load (or simulate) the dataset at `data_path` and fit a `kind` model.
/// Nothing is persisted besides what the dataset store writes.
pub fn train(kind: ModelKind, data_path: &Path) -> Result<TrainingOutcome, TrainError> {
    let dataset = dataset::load_or_generate(data_path)?;
    let started = Instant::now();
    let outcome = train_on(kind, &dataset)?;
    info!(
        model_type = %kind,
        rows = dataset.len(),
        r2 = outcome.r2,
        mse = outcome.mse,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "model trained"
    );
    Ok(outcome)
}

pub fn train_and_save(kind: ModelKind, data_path: &Path, model_path: &Path) -> Result<TrainingOutcome, TrainError> {
    let outcome = train(kind, data_path)?;
    registry::save_model(&outcome.model, model_path)?;
    Ok(outcome)
}
