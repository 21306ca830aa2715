//! Detector backends.
//!
//! `build(config)` is the factory, called once at startup.

pub mod fixed;
#[cfg(feature = "detector-onnx")]
pub mod yolo;

use tracing::info;

use crate::config::DetectorConfig;
use crate::detector::{Backend, ClassLabels, Detector, DetectorError};

/// Construct a [`Detector`] from config.
pub fn build(config: &DetectorConfig) -> Result<Detector, DetectorError> {
    let labels = ClassLabels::new(config.class_names.clone(), config.infested_class);
    let backend = match config.provider.as_str() {
        "fixed" => Backend::Fixed(fixed::FixedDetector::new(
            config.fixed.clone(),
            config.confidence,
        )),
        #[cfg(feature = "detector-onnx")]
        "yolo" | "onnx" => Backend::Yolo(yolo::YoloDetector::load(config)?),
        #[cfg(not(feature = "detector-onnx"))]
        "yolo" | "onnx" => {
            return Err(DetectorError::Load(
                "built without the `detector-onnx` feature".to_string(),
            ));
        }
        other => return Err(DetectorError::UnknownProvider(other.to_string())),
    };

    let detector = Detector::new(backend, labels);
    info!(provider = detector.name(), "detector ready");
    Ok(detector)
}
