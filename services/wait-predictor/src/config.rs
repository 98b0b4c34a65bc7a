use std::path::PathBuf;

use serde::Deserialize;

use crate::model::ModelKind;
use crate::vision::{DEFAULT_CONF_THRESHOLD, DEFAULT_MAX_PEOPLE};

pub const SERVICE_NAME: &str = "wait-predictor";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service_name: String,
    pub log_level: String,
    pub http_port: u16,
    pub data_path: PathBuf,
    pub model_path: PathBuf,
    /// Family trained when no usable artifact exists at startup.
    pub bootstrap_model_type: ModelKind,
    pub vision: VisionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.into(),
            log_level: "info".into(),
            http_port: 8000,
            data_path: PathBuf::from("data/queue_data.csv"),
            model_path: PathBuf::from("models/wait_time_model.json"),
            bootstrap_model_type: ModelKind::Linear,
            vision: VisionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// YOLOv8-style ONNX export.
    pub model_path: PathBuf,
    /// Square network input side in pixels.
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    /// Detections kept per image after NMS.
    pub max_detections: usize,
    pub max_people: usize,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            input_size: 640,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            iou_threshold: 0.7,
            max_detections: 300,
            max_people: DEFAULT_MAX_PEOPLE,
        }
    }
}

impl ServiceConfig {
    pub fn load() -> anyhow::Result<Self> {
        waitline_core::load_config(SERVICE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: ServiceConfig = serde_json::from_str(r#"{"http_port": 9001, "vision": {"max_people": 80}}"#).unwrap();
        assert_eq!(cfg.http_port, 9001);
        assert_eq!(cfg.vision.max_people, 80);
        assert_eq!(cfg.vision.input_size, 640);
        assert_eq!(cfg.vision.max_detections, 300);
        assert_eq!(cfg.model_path, PathBuf::from("models/wait_time_model.json"));
        assert_eq!(cfg.bootstrap_model_type, ModelKind::Linear);
    }

    #[test]
    fn environment_overrides_nested_keys() {
        std::env::set_var("WAITLINE__VISION__MAX_PEOPLE", "300");
        std::env::set_var("WAITLINE__BOOTSTRAP_MODEL_TYPE", "random_forest");
        let cfg = ServiceConfig::load().unwrap();
        std::env::remove_var("WAITLINE__VISION__MAX_PEOPLE");
        std::env::remove_var("WAITLINE__BOOTSTRAP_MODEL_TYPE");
        assert_eq!(cfg.vision.max_people, 300);
        assert_eq!(cfg.bootstrap_model_type, ModelKind::RandomForest);
        assert_eq!(cfg.service_name, SERVICE_NAME);
        assert_eq!(cfg.http_port, 8000);
    }
}
