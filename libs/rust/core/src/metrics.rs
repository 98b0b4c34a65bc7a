//! Prometheus metric groups for the wait-time pipeline.
//!
//! Registration happens once on first use. If registration fails the
//! recorders degrade to no-ops; metrics never fail a request.

use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec};
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionOutcome { Success, InvalidInput, Unavailable, Failed }

impl PredictionOutcome {
    fn as_label(self) -> &'static str {
        match self {
            PredictionOutcome::Success => "success",
            PredictionOutcome::InvalidInput => "invalid_input",
            PredictionOutcome::Unavailable => "unavailable",
            PredictionOutcome::Failed => "failed",
        }
    }
}

struct PipelineMetrics {
    predictions_total: IntCounterVec,
    prediction_latency_seconds: Histogram,
    retrains_total: IntCounterVec,
    training_duration_seconds: HistogramVec,
    vision_people: Histogram,
    vision_fallback_total: IntCounter,
}

impl PipelineMetrics {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            predictions_total: register_int_counter_vec!(
                "waitline_predictions_total",
                "Wait-time predictions by outcome",
                &["outcome"]
            )?,
            prediction_latency_seconds: register_histogram!(
                "waitline_prediction_latency_seconds",
                "Latency of a single prediction including lazy model bootstrap",
                vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )?,
            retrains_total: register_int_counter_vec!(
                "waitline_retrains_total",
                "Retrain requests by model type and outcome",
                &["model_type", "outcome"]
            )?,
            training_duration_seconds: register_histogram_vec!(
                "waitline_training_duration_seconds",
                "Wall time spent training and persisting a model",
                &["model_type"],
                vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
            )?,
            vision_people: register_histogram!(
                "waitline_vision_people",
                "People counted per submitted image",
                vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]
            )?,
            vision_fallback_total: register_int_counter!(
                "waitline_vision_fallback_total",
                "Images whose detector output could not be interpreted"
            )?,
        })
    }
}

static PIPELINE_METRICS: Lazy<Option<PipelineMetrics>> = Lazy::new(|| match PipelineMetrics::register() {
    Ok(m) => Some(m),
    Err(e) => {
        tracing::warn!(error = %e, "pipeline metrics registration failed");
        None
    }
});

pub fn record_prediction(outcome: PredictionOutcome, elapsed: Duration) {
    if let Some(m) = PIPELINE_METRICS.as_ref() {
        m.predictions_total.with_label_values(&[outcome.as_label()]).inc();
        m.prediction_latency_seconds.observe(elapsed.as_secs_f64());
    }
}

pub fn record_retrain(model_type: &str, success: bool, elapsed: Duration) {
    if let Some(m) = PIPELINE_METRICS.as_ref() {
        let outcome = if success { "success" } else { "error" };
        m.retrains_total.with_label_values(&[model_type, outcome]).inc();
        if success {
            m.training_duration_seconds.with_label_values(&[model_type]).observe(elapsed.as_secs_f64());
        }
    }
}

/// `fallback` marks images whose detector output was discarded.
pub fn record_vision_count(people: usize, fallback: bool) {
    if let Some(m) = PIPELINE_METRICS.as_ref() {
        m.vision_people.observe(people as f64);
        if fallback {
            m.vision_fallback_total.inc();
        }
    }
}
