//! Image-based queue-size estimator.
//!
//! Counting is best effort: detector output that cannot be interpreted is
//! counted as 0. Undecodable images and a detector that cannot be built or
//! run are still errors.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{info, warn};
use waitline_core::record_vision_count;

use crate::config::VisionConfig;

/// COCO class index for "person".
pub const PERSON_CLASS_ID: usize = 0;
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.35;
pub const DEFAULT_MAX_PEOPLE: usize = 500;
/// Letterbox fill, the usual YOLO grey.
const PAD_VALUE: f32 = 114.0 / 255.0;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("person detector unavailable: {0}")]
    DetectorUnavailable(String),
    #[error("person detector failed: {0}")]
    Detector(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in network input pixels.
    pub bbox: [f32; 4],
}

pub trait PersonDetector: Send + Sync {
    /// `Ok(None)` means the detector ran but produced output that could not
    /// be read as detections.
    fn detect(&self, image: &RgbImage, conf_threshold: f32) -> Result<Option<Vec<Detection>>, VisionError>;
}

type DetectorLoader = Box<dyn Fn() -> Result<Arc<dyn PersonDetector>, VisionError> + Send + Sync>;

/// Estimator with a detector built on first use and kept for the life of
/// the process.
pub struct QueueSizeEstimator {
    loader: DetectorLoader,
    detector: OnceCell<Arc<dyn PersonDetector>>,
}

impl QueueSizeEstimator {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn PersonDetector>, VisionError> + Send + Sync + 'static,
    {
        Self { loader: Box::new(loader), detector: OnceCell::new() }
    }

    pub fn with_detector(detector: Arc<dyn PersonDetector>) -> Self {
        Self::new(move || Ok(Arc::clone(&detector)))
    }

    pub fn from_config(cfg: &VisionConfig) -> Self {
        let cfg = cfg.clone();
        Self::new(move || load_detector(&cfg))
    }

    pub fn is_initialized(&self) -> bool {
        self.detector.get().is_some()
    }

    fn detector(&self) -> Result<&Arc<dyn PersonDetector>, VisionError> {
        self.detector.get_or_try_init(|| {
            let detector = (self.loader)()?;
            info!("person detector initialised");
            Ok(detector)
        })
    }

    pub fn estimate(&self, image_bytes: &[u8], conf_threshold: f32, max_people: usize) -> Result<usize, VisionError> {
        if !(conf_threshold.is_finite() && (0.0..=1.0).contains(&conf_threshold)) {
            return Err(VisionError::InvalidParameter(format!("conf_threshold must be within [0, 1], got {conf_threshold}")));
        }
        let image = image::load_from_memory(image_bytes)?.to_rgb8();
        let detections = self.detector()?.detect(&image, conf_threshold)?;
        let fallback = detections.is_none();
        let people = count_people(detections, conf_threshold, max_people);
        record_vision_count(people, fallback);
        Ok(people)
    }
}

/// Person detections strictly above `conf_threshold`, clamped to `max_people`.
/// Unreadable detector output counts as 0.
pub fn count_people(detections: Option<Vec<Detection>>, conf_threshold: f32, max_people: usize) -> usize {
    let Some(detections) = detections else {
        warn!("detector output could not be interpreted, counting 0 people");
        return 0;
    };
    detections
        .iter()
        .filter(|d| d.class_id == PERSON_CLASS_ID && d.confidence > conf_threshold)
        .count()
        .min(max_people)
}

#[cfg(feature = "onnx")]
fn load_detector(cfg: &VisionConfig) -> Result<Arc<dyn PersonDetector>, VisionError> {
    Ok(Arc::new(yolo::YoloDetector::load(cfg)?))
}

#[cfg(not(feature = "onnx"))]
fn load_detector(_cfg: &VisionConfig) -> Result<Arc<dyn PersonDetector>, VisionError> {
    Err(VisionError::DetectorUnavailable("built without the `onnx` feature".into()))
}

/// Resize into a `side` x `side` canvas keeping aspect ratio, centred on grey
/// padding. Returns planar RGB (CHW) scaled to [0, 1].
pub fn letterbox(image: &RgbImage, side: u32) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let plane = (side * side) as usize;
    let mut data = vec![PAD_VALUE; 3 * plane];
    if w == 0 || h == 0 || side == 0 {
        return data;
    }
    let scale = (side as f32 / w as f32).min(side as f32 / h as f32);
    let nw = ((w as f32 * scale).round() as u32).clamp(1, side);
    let nh = ((h as f32 * scale).round() as u32).clamp(1, side);
    let resized = imageops::resize(image, nw, nh, FilterType::Triangle);
    let (ox, oy) = ((side - nw) / 2, (side - nh) / 2);
    for (x, y, px) in resized.enumerate_pixels() {
        let idx = ((y + oy) * side + (x + ox)) as usize;
        for c in 0..3 {
            data[c * plane + idx] = f32::from(px[c]) / 255.0;
        }
    }
    data
}

/// Read a YOLOv8-style head, `[1, 4 + classes, anchors]` or its transpose,
/// keeping each anchor's best class when it scores above
/// `conf_threshold`. `None` for any shape that is not such a head.
pub fn decode_predictions(shape: &[usize], data: &[f32], conf_threshold: f32) -> Option<Vec<Detection>> {
    let (d1, d2) = match *shape {
        [1, a, b] | [a, b] => (a, b),
        _ => return None,
    };
    if d1.checked_mul(d2)? != data.len() {
        return None;
    }
    // the attribute axis is the short one
    let attr_major = d1 <= d2;
    let (attrs, anchors) = if attr_major { (d1, d2) } else { (d2, d1) };
    if attrs < 5 {
        return None;
    }
    let at = |anchor: usize, attr: usize| {
        if attr_major { data[attr * anchors + anchor] } else { data[anchor * attrs + attr] }
    };

    let mut out = Vec::new();
    for anchor in 0..anchors {
        let best = (4..attrs)
            .map(|attr| (attr - 4, at(anchor, attr)))
            .filter(|(_, s)| s.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let Some((class_id, confidence)) = best else { continue };
        if confidence <= conf_threshold {
            continue;
        }
        let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
        out.push(Detection { class_id, confidence, bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0] });
    }
    Some(out)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = iw * ih;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Class-aware greedy NMS, highest confidence first, keeping at most
/// `max_detections`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32, max_detections: usize) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len().min(max_detections));
    for d in detections {
        if kept.len() == max_detections {
            break;
        }
        let overlaps = kept.iter().any(|k| k.class_id == d.class_id && iou(&k.bbox, &d.bbox) > iou_threshold);
        if !overlaps {
            kept.push(d);
        }
    }
    kept
}

#[cfg(feature = "onnx")]
mod yolo {
    use image::RgbImage;
    use tract_onnx::prelude::*;
    use tracing::debug;

    use super::{decode_predictions, letterbox, non_max_suppression, Detection, PersonDetector, VisionError};
    use crate::config::VisionConfig;

    pub struct YoloDetector {
        plan: TypedRunnableModel<TypedModel>,
        side: usize,
        iou_threshold: f32,
        max_detections: usize,
    }

    impl YoloDetector {
        pub fn load(cfg: &VisionConfig) -> Result<Self, VisionError> {
            let side = cfg.input_size as usize;
            if side < 32 {
                return Err(VisionError::DetectorUnavailable(format!("input_size {side} is too small")));
            }
            let unavailable = |e: TractError| VisionError::DetectorUnavailable(format!("{}: {e}", cfg.model_path.display()));
            let plan = tract_onnx::onnx()
                .model_for_path(&cfg.model_path)
                .and_then(|m| m.with_input_fact(0, f32::fact([1, 3, side, side]).into()))
                .and_then(|m| m.into_optimized())
                .and_then(|m| m.into_runnable())
                .map_err(unavailable)?;
            Ok(Self { plan, side, iou_threshold: cfg.iou_threshold, max_detections: cfg.max_detections })
        }
    }

    impl PersonDetector for YoloDetector {
        fn detect(&self, image: &RgbImage, conf_threshold: f32) -> Result<Option<Vec<Detection>>, VisionError> {
            let failed = |e: TractError| VisionError::Detector(e.to_string());
            let data = letterbox(image, self.side as u32);
            let input: Tensor = tract_ndarray::Array4::from_shape_vec((1, 3, self.side, self.side), data)
                .map_err(|e| VisionError::Detector(e.to_string()))?
                .into();
            let outputs = self.plan.run(tvec!(input.into())).map_err(failed)?;

            let Some(head) = outputs.first() else {
                return Ok(None);
            };
            let Ok(view) = head.to_array_view::<f32>() else {
                return Ok(None);
            };
            let flat: Vec<f32> = view.iter().copied().collect();
            let decoded = decode_predictions(view.shape(), &flat, conf_threshold)
                .map(|d| non_max_suppression(d, self.iou_threshold, self.max_detections));
            debug!(candidates = decoded.as_ref().map(Vec::len), "yolo head decoded");
            Ok(decoded)
        }
    }
}
