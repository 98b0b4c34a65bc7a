//! Synthetic queue simulator.
//!
//! Wait time is modelled as the cost of clearing the current line,
//! `queue_size * avg_service_time`, plus zero-mean Gaussian noise whose
//! standard deviation scales with that base cost.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{Dataset, QueueObservation};
use crate::RANDOM_SEED;

/// Per-person service time bounds in seconds.
pub const SERVICE_TIME_SECS: (f64, f64) = (30.0, 300.0);
/// Arrival rate bounds in people per minute.
pub const ARRIVAL_RATE_PER_MIN: (f64, f64) = (0.5, 10.0);

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid queue size range {min}..={max}")]
    InvalidQueueRange { min: u32, max: u32 },
    #[error("num_samples must be positive")]
    NoSamples,
    #[error("noise level must be finite and non-negative, got {0}")]
    InvalidNoise(f64),
    #[error("noise distribution: {0}")]
    Noise(#[from] rand_distr::NormalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub min_queue_size: u32,
    pub max_queue_size: u32,
    pub num_samples: usize,
    /// Noise standard deviation as a fraction of the base wait (0.15 = 15%).
    pub noise_level: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self { min_queue_size: 1, max_queue_size: 200, num_samples: 300, noise_level: 0.15 }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.min_queue_size == 0 || self.min_queue_size > self.max_queue_size {
            return Err(SimulationError::InvalidQueueRange { min: self.min_queue_size, max: self.max_queue_size });
        }
        if self.num_samples == 0 {
            return Err(SimulationError::NoSamples);
        }
        if !self.noise_level.is_finite() || self.noise_level < 0.0 {
            return Err(SimulationError::InvalidNoise(self.noise_level));
        }
        Ok(())
    }
}

/// Generate a dataset. The RNG is reseeded on every call, so identical
/// parameters always yield identical observations.
pub fn generate(params: &SimulationParams) -> Result<Dataset, SimulationError> {
    params.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(RANDOM_SEED);
    let mut observations = Vec::with_capacity(params.num_samples);

    for _ in 0..params.num_samples {
        let queue_size = rng.gen_range(params.min_queue_size..=params.max_queue_size);
        let avg_service_time = rng.gen_range(SERVICE_TIME_SECS.0..SERVICE_TIME_SECS.1);
        let arrival_rate = rng.gen_range(ARRIVAL_RATE_PER_MIN.0..ARRIVAL_RATE_PER_MIN.1);

        let base_wait = f64::from(queue_size) * avg_service_time;
        let noise = Normal::new(0.0, base_wait * params.noise_level)?.sample(&mut rng);
        let waiting_time = (base_wait + noise).max(0.0);

        observations.push(QueueObservation { queue_size, avg_service_time, arrival_rate, waiting_time });
    }

    Ok(Dataset::new(observations))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_params_same_dataset() {
        let params = SimulationParams { num_samples: 50, ..Default::default() };
        let a = generate(&params).unwrap();
        let b = generate(&params).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_csv_bytes().unwrap(), b.to_csv_bytes().unwrap());
    }

    #[test]
    fn samples_respect_bounds() {
        let params = SimulationParams { min_queue_size: 5, max_queue_size: 9, num_samples: 500, noise_level: 0.15 };
        let ds = generate(&params).unwrap();
        assert_eq!(ds.len(), 500);
        for obs in ds.observations() {
            assert!((5..=9).contains(&obs.queue_size));
            assert!(obs.avg_service_time >= 30.0 && obs.avg_service_time < 300.0);
            assert!(obs.arrival_rate >= 0.5 && obs.arrival_rate < 10.0);
            assert!(obs.waiting_time >= 0.0);
        }
    }

    #[test]
    fn zero_noise_is_exact_line_clearing_cost() {
        let params = SimulationParams { num_samples: 20, noise_level: 0.0, ..Default::default() };
        for obs in generate(&params).unwrap().observations() {
            assert_eq!(obs.waiting_time, f64::from(obs.queue_size) * obs.avg_service_time);
        }
    }

    #[test]
    fn rejects_bad_params() {
        let inverted = SimulationParams { min_queue_size: 10, max_queue_size: 2, ..Default::default() };
        assert!(matches!(generate(&inverted), Err(SimulationError::InvalidQueueRange { .. })));
        let empty = SimulationParams { num_samples: 0, ..Default::default() };
        assert!(matches!(generate(&empty), Err(SimulationError::NoSamples)));
        let noisy = SimulationParams { noise_level: -0.1, ..Default::default() };
        assert!(matches!(generate(&noisy), Err(SimulationError::InvalidNoise(_))));
    }
}
