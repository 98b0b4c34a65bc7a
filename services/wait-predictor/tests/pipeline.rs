use std::fs;
use std::sync::Arc;

use wait_predictor::dataset::{self, COLUMNS};
use wait_predictor::model::{ModelKind, WaitModel};
use wait_predictor::predictor::{PredictionRequest, RetrainError};
use wait_predictor::registry;
use wait_predictor::{SimulationParams, WaitTimePredictor};

fn predictor_in(dir: &tempfile::TempDir) -> WaitTimePredictor {
    WaitTimePredictor::new(dir.path().join("data/queue_data.csv"), dir.path().join("models/wait_time_model.json"))
}

#[test]
fn first_prediction_bootstraps_linear_model() {
    let dir = tempfile::tempdir().unwrap();
    let p = predictor_in(&dir);
    assert!(!p.is_healthy());

    let out = p
        .predict(&PredictionRequest { queue_size: 50, avg_service_time: 120.0, arrival_rate: None })
        .unwrap();
    assert_eq!(out.arrival_rate, None);
    assert_eq!(out.queue_size, 50);
    assert!(out.predicted_wait_time_seconds.is_finite() && out.predicted_wait_time_seconds >= 0.0);
    // roughly the cost of clearing the line
    assert!(out.predicted_wait_time_seconds > 1000.0 && out.predicted_wait_time_seconds < 12000.0, "{out:?}");
    let minutes = out.predicted_wait_time_seconds / 60.0;
    assert!((out.predicted_wait_time_minutes - minutes).abs() <= 0.01);

    assert!(p.is_healthy());
    assert_eq!(p.active_model().unwrap().kind(), ModelKind::Linear);
    let data = fs::read_to_string(dir.path().join("data/queue_data.csv")).unwrap();
    assert_eq!(data.lines().next().unwrap(), COLUMNS.join(","));
    assert_eq!(data.lines().count(), 1 + SimulationParams::default().num_samples);
}

#[test]
fn predictions_are_idempotent_and_non_negative() {
    let dir = tempfile::tempdir().unwrap();
    let p = predictor_in(&dir);
    for (q, s, r) in [(1, 30.0, Some(0.5)), (7, 45.5, None), (120, 299.0, Some(9.5)), (200, 300.0, None)] {
        let req = PredictionRequest { queue_size: q, avg_service_time: s, arrival_rate: r };
        let a = p.predict(&req).unwrap();
        let b = p.predict(&req).unwrap();
        assert_eq!(a, b);
        assert!(a.predicted_wait_time_seconds >= 0.0);
        assert!((a.predicted_wait_time_minutes - a.predicted_wait_time_seconds / 60.0).abs() <= 0.01);
    }
}

#[test]
fn restart_reuses_saved_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let req = PredictionRequest { queue_size: 12, avg_service_time: 80.0, arrival_rate: Some(3.0) };
    let first = predictor_in(&dir).predict(&req).unwrap();

    // a second process sees the same artifact and does not retrain
    fs::remove_file(dir.path().join("data/queue_data.csv")).unwrap();
    let second = predictor_in(&dir).predict(&req).unwrap();
    assert_eq!(first, second);
    assert!(!dir.path().join("data/queue_data.csv").exists());
}

#[test]
fn corrupt_artifact_forces_retraining() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("models/wait_time_model.json");
    fs::create_dir_all(model_path.parent().unwrap()).unwrap();
    fs::write(&model_path, "{ truncated").unwrap();
    assert!(registry::load_model(&model_path).is_none());

    let p = predictor_in(&dir);
    p.ensure_model().unwrap();
    assert!(registry::load_model(&model_path).is_some());
    assert!(p.is_healthy());
}

#[test]
fn retrain_swaps_in_forest_and_persists_it() {
    let dir = tempfile::tempdir().unwrap();
    let p = predictor_in(&dir);
    let before = p.ensure_model().unwrap();
    assert_eq!(before.kind(), ModelKind::Linear);

    let outcome = p.retrain("random_forest").unwrap();
    assert_eq!(outcome.status, "success");
    assert_eq!(outcome.model_type, ModelKind::RandomForest);
    assert!(outcome.r2_score > 0.5 && outcome.mse > 0.0);

    let active = p.active_model().unwrap();
    assert_eq!(active.kind(), ModelKind::RandomForest);
    let stored = registry::load_model(p.model_path()).unwrap();
    let features = [50.0, 120.0, 2.0];
    assert_eq!(active.predict(&features).unwrap(), stored.predict(&features).unwrap());

    let err = p.retrain("bogus").unwrap_err();
    assert!(matches!(err, RetrainError::UnknownModelType(_)));
    assert!(Arc::ptr_eq(&active, &p.active_model().unwrap()));
}

#[test]
fn readers_never_see_a_missing_model_during_retrain() {
    let dir = tempfile::tempdir().unwrap();
    let p = Arc::new(predictor_in(&dir));
    p.ensure_model().unwrap();
    let req = PredictionRequest { queue_size: 30, avg_service_time: 60.0, arrival_rate: None };

    std::thread::scope(|s| {
        let writer = Arc::clone(&p);
        s.spawn(move || {
            writer.retrain("random_forest").unwrap();
            writer.retrain("linear").unwrap();
        });
        for _ in 0..4 {
            let reader = Arc::clone(&p);
            let req = req.clone();
            s.spawn(move || {
                for _ in 0..50 {
                    let out = reader.predict(&req).unwrap();
                    assert!(out.predicted_wait_time_seconds >= 0.0);
                }
            });
        }
    });
    assert_eq!(p.active_model().unwrap().kind(), ModelKind::Linear);
}

#[test]
fn regenerated_dataset_matches_num_samples() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue_data.csv");
    let first = dataset::load_or_generate(&path).unwrap();
    fs::remove_file(&path).unwrap();
    let second = dataset::load_or_generate(&path).unwrap();
    assert_eq!(second.len(), SimulationParams::default().num_samples);
    assert_eq!(first, second);
}
