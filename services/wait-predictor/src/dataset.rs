//! Queue observation dataset and its CSV cache.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::model::{feature_vector, FEATURE_COUNT};
use crate::simulation::{self, SimulationError, SimulationParams};

/// Header of the dataset file, in column order.
pub const COLUMNS: [&str; 4] = ["queue_size", "avg_service_time", "arrival_rate", "waiting_time"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset io at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("malformed dataset {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("csv encode: {0}")]
    Encode(String),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// One (inputs, waiting_time) sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueObservation {
    pub queue_size: u32,
    /// Seconds per person.
    pub avg_service_time: f64,
    /// People per minute.
    pub arrival_rate: f64,
    /// Seconds.
    pub waiting_time: f64,
}

impl QueueObservation {
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        feature_vector(self.queue_size, self.avg_service_time, self.arrival_rate)
    }

    fn check(&self) -> Result<(), String> {
        if self.queue_size == 0 {
            return Err("queue_size must be positive".into());
        }
        let reals = [self.avg_service_time, self.arrival_rate, self.waiting_time];
        if reals.iter().any(|v| !v.is_finite()) {
            return Err("non-finite value".into());
        }
        if self.avg_service_time <= 0.0 || self.arrival_rate <= 0.0 {
            return Err("avg_service_time and arrival_rate must be positive".into());
        }
        if self.waiting_time < 0.0 {
            return Err("waiting_time must be non-negative".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    observations: Vec<QueueObservation>,
}

impl Dataset {
    pub fn new(observations: Vec<QueueObservation>) -> Self { Self { observations } }
    pub fn len(&self) -> usize { self.observations.len() }
    pub fn is_empty(&self) -> bool { self.observations.is_empty() }
    pub fn observations(&self) -> &[QueueObservation] { &self.observations }

    /// `n x 3` matrix in feature order.
    pub fn features(&self) -> Array2<f64> {
        let mut x = Array2::zeros((self.len(), FEATURE_COUNT));
        for (mut row, obs) in x.rows_mut().into_iter().zip(&self.observations) {
            for (cell, v) in row.iter_mut().zip(obs.features()) {
                *cell = v;
            }
        }
        x
    }

    pub fn targets(&self) -> Array1<f64> {
        self.observations.iter().map(|o| o.waiting_time).collect()
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, DatasetError> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        wtr.write_record(COLUMNS).map_err(|e| DatasetError::Encode(e.to_string()))?;
        for obs in &self.observations {
            wtr.serialize(obs).map_err(|e| DatasetError::Encode(e.to_string()))?;
        }
        wtr.into_inner().map_err(|e| DatasetError::Encode(e.to_string()))
    }

    fn from_csv_reader<R: Read>(reader: R, path: &Path) -> Result<Self, DatasetError> {
        let malformed = |reason: String| DatasetError::Malformed { path: path.to_path_buf(), reason };
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers().map_err(|e| malformed(e.to_string()))?.clone();
        if !headers.iter().map(str::trim).eq(COLUMNS.iter().copied()) {
            return Err(malformed(format!("expected header {:?}, found {:?}", COLUMNS, headers)));
        }
        let mut observations = Vec::new();
        for (idx, row) in rdr.deserialize::<QueueObservation>().enumerate() {
            // +2: one for the header line, one for 1-based numbering
            let line = idx + 2;
            let obs = row.map_err(|e| malformed(format!("line {line}: {e}")))?;
            obs.check().map_err(|reason| malformed(format!("line {line}: {reason}")))?;
            observations.push(obs);
        }
        Ok(Self { observations })
    }
}

/// Parse the dataset at `path`. Malformed content is an error, never repaired.
pub fn read_dataset(path: &Path) -> Result<Dataset, DatasetError> {
    let file = fs::File::open(path).map_err(|source| DatasetError::Io { path: path.to_path_buf(), source })?;
    Dataset::from_csv_reader(std::io::BufReader::new(file), path)
}

pub fn save_dataset(dataset: &Dataset, path: &Path) -> Result<(), DatasetError> {
    let io_err = |source| DatasetError::Io { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, dataset.to_csv_bytes()?).map_err(io_err)?;
    info!(path = %path.display(), rows = dataset.len(), "queue data saved");
    Ok(())
}

pub fn load_or_generate(path: &Path) -> Result<Dataset, DatasetError> {
    load_or_generate_with(path, &SimulationParams::default())
}

/// Return the cached dataset, or simulate one with `params` and cache it.
pub fn load_or_generate_with(path: &Path, params: &SimulationParams) -> Result<Dataset, DatasetError> {
    if path.exists() {
        info!(path = %path.display(), "loading queue data");
        return read_dataset(path);
    }
    info!(path = %path.display(), samples = params.num_samples, "queue data not found, generating");
    let dataset = simulation::generate(params)?;
    save_dataset(&dataset, path)?;
    Ok(dataset)
}
