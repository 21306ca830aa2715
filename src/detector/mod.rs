//! Object detector abstraction.
//!
//! [`Detector`] pairs a backend (enum dispatch over `providers/`) with the
//! class vocabulary that maps class ids to the two plant statuses. Backends
//! are synchronous and CPU-bound: call [`Detector::detect`] from
//! `spawn_blocking`, never directly on the async runtime.
//!
//! Adding a backend = new module in `providers/` + new [`Backend`] variant +
//! new `detect` arm.

pub mod letterbox;
pub mod postprocess;
pub mod providers;

use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("unknown detector provider: {0}")]
    UnknownProvider(String),
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

// ── Detection ─────────────────────────────────────────────────────────────────

/// One bounding box in original-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Class score in `0..=1`.
    pub confidence: f32,
    pub class_id: u32,
    pub class_name: String,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn intersection_area(&self, other: &Detection) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 > x1 && y2 > y1 { (x2 - x1) * (y2 - y1) } else { 0.0 }
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 { intersection / union } else { 0.0 }
    }

    /// Center/size box normalized by the image dimensions: `[xc, yc, w, h]`.
    pub fn xywhn(&self, width: u32, height: u32) -> [f64; 4] {
        let (w, h) = (f64::from(width.max(1)), f64::from(height.max(1)));
        let (x1, y1, x2, y2) = (
            f64::from(self.x1),
            f64::from(self.y1),
            f64::from(self.x2),
            f64::from(self.y2),
        );
        [(x1 + x2) / 2.0 / w, (y1 + y2) / 2.0 / h, (x2 - x1) / w, (y2 - y1) / h]
    }

    pub fn xyxy(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Plant status derived from a detection's class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    #[serde(rename = "INFESTED")]
    Infested,
    #[serde(rename = "NOT INFESTED")]
    NotInfested,
}

impl Status {
    /// Label stored in `corn_plants.status` and returned by the batch API.
    pub fn label(self) -> &'static str {
        match self {
            Status::Infested => "INFESTED",
            Status::NotInfested => "NOT INFESTED",
        }
    }

    /// Class string stored in `detections.class`.
    pub fn class_key(self) -> &'static str {
        match self {
            Status::Infested => "infested",
            Status::NotInfested => "not_infested",
        }
    }
}

/// Class-id vocabulary shared by every backend.
#[derive(Debug, Clone)]
pub struct ClassLabels {
    names: Vec<String>,
    infested_class: u32,
}

impl ClassLabels {
    pub fn new(names: Vec<String>, infested_class: u32) -> Self {
        Self { names, infested_class }
    }

    /// Number of named classes.
    pub fn class_count(&self) -> usize {
        self.names.len()
    }

    pub fn name(&self, class_id: u32) -> String {
        self.names
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    pub fn status(&self, class_id: u32) -> Status {
        if class_id == self.infested_class { Status::Infested } else { Status::NotInfested }
    }
}

// ── Detector ──────────────────────────────────────────────────────────────────

/// All available detector backends.
pub enum Backend {
    #[cfg(feature = "detector-onnx")]
    Yolo(providers::yolo::YoloDetector),
    Fixed(providers::fixed::FixedDetector),
}

/// A loaded detector. Shared behind `Arc` by the HTTP handlers.
pub struct Detector {
    backend: Backend,
    labels: ClassLabels,
}

impl Detector {
    pub fn new(backend: Backend, labels: ClassLabels) -> Self {
        Self { backend, labels }
    }

    /// Run the model on `img`; boxes come back sorted by confidence, highest first.
    pub fn detect(&self, img: &DynamicImage) -> Result<Vec<Detection>, DetectorError> {
        match &self.backend {
            #[cfg(feature = "detector-onnx")]
            Backend::Yolo(d) => d.detect(img, &self.labels),
            Backend::Fixed(d) => Ok(d.detect(img, &self.labels)),
        }
    }

    pub fn status(&self, detection: &Detection) -> Status {
        self.labels.status(detection.class_id)
    }

    /// Backend name for logs and the health route.
    pub fn name(&self) -> &'static str {
        match &self.backend {
            #[cfg(feature = "detector-onnx")]
            Backend::Yolo(_) => "yolo",
            Backend::Fixed(_) => "fixed",
        }
    }
}
