//! YOLOv8 detector on ONNX Runtime.

use std::sync::Mutex;

use image::{DynamicImage, GenericImageView};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tracing::{debug, info};

use crate::config::DetectorConfig;
use crate::detector::letterbox;
use crate::detector::postprocess::{self, DecodeParams};
use crate::detector::{ClassLabels, Detection, DetectorError};

pub struct YoloDetector {
    // `Session::run` needs exclusive access.
    session: Mutex<Session>,
    input_size: u32,
    input_name: String,
    output_name: String,
    params: DecodeParams,
}

impl YoloDetector {
    pub fn load(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let path = &config.model_path;
        if !path.is_file() {
            return Err(DetectorError::Load(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let mut builder = Session::builder()
            .map_err(|e| DetectorError::Load(format!("session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetectorError::Load(format!("optimization level: {e}")))?;
        if config.intra_threads > 0 {
            builder = builder
                .with_intra_threads(config.intra_threads)
                .map_err(|e| DetectorError::Load(format!("intra threads: {e}")))?;
        }
        let session = builder
            .commit_from_file(path)
            .map_err(|e| DetectorError::Load(format!("{}: {e}", path.display())))?;

        info!(
            model = %path.display(),
            input_size = config.input_size,
            "onnx session loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_size: config.input_size,
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            params: DecodeParams { confidence: config.confidence, iou: config.iou },
        })
    }

    pub fn detect(
        &self,
        img: &DynamicImage,
        labels: &ClassLabels,
    ) -> Result<Vec<Detection>, DetectorError> {
        let size = i64::from(self.input_size);
        let (data, lb) = letterbox::prepare(img, self.input_size);
        let input = Tensor::from_array(([1, 3, size, size], data.into_boxed_slice()))
            .map_err(|e| DetectorError::Inference(format!("input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::Inference("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| DetectorError::Inference(format!("run: {e}")))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            DetectorError::Inference(format!("model has no output named '{}'", self.output_name))
        })?;
        let (shape, values) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(format!("extract output: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let detections =
            postprocess::decode(values, &dims, &lb, img.dimensions(), self.params, labels)?;
        debug!(boxes = detections.len(), "yolo inference done");
        Ok(detections)
    }
}
