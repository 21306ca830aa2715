//! Fixed detector: returns configured boxes for any image.
//!
//! Used for demos without a model file and throughout the test suite.

use image::{DynamicImage, GenericImageView};

use crate::config::FixedDetection;
use crate::detector::{ClassLabels, Detection};

#[derive(Debug, Clone)]
pub struct FixedDetector {
    entries: Vec<FixedDetection>,
    confidence: f32,
}

impl FixedDetector {
    pub fn new(entries: Vec<FixedDetection>, confidence: f32) -> Self {
        Self { entries, confidence }
    }

    /// Scale every configured box to `img` and apply the confidence threshold.
    pub fn detect(&self, img: &DynamicImage, labels: &ClassLabels) -> Vec<Detection> {
        let (w, h) = img.dimensions();
        let (w, h) = (w as f32, h as f32);

        let mut out: Vec<Detection> = self
            .entries
            .iter()
            .filter(|e| e.confidence > self.confidence)
            .map(|e| {
                let [x1, y1, x2, y2] = e.bbox.map(|v| v.clamp(0.0, 1.0));
                Detection {
                    x1: x1 * w,
                    y1: y1 * h,
                    x2: x2 * w,
                    y2: y2 * h,
                    confidence: e.confidence,
                    class_id: e.class_id,
                    class_name: labels.name(e.class_id),
                }
            })
            .collect();
        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        out
    }
}
