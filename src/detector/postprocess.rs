//! Decoding of raw YOLOv8 output tensors.
//!
//! The detection head emits `[1, 4 + classes, boxes]`: rows 0..4 hold
//! `cx, cy, w, h` in model-input pixels, the remaining rows hold per-class
//! scores. Exports transposed to `[1, boxes, 4 + classes]` are accepted too;
//! the layout is picked by which axis matches the configured class count.

use super::letterbox::Letterbox;
use super::{ClassLabels, Detection, DetectorError};

/// Thresholds applied while decoding.
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub confidence: f32,
    pub iou: f32,
}

/// Decode `data` with `shape` into boxes in original-image coordinates,
/// suppressed and sorted by confidence.
pub fn decode(
    data: &[f32],
    shape: &[usize],
    lb: &Letterbox,
    image_size: (u32, u32),
    params: DecodeParams,
    labels: &ClassLabels,
) -> Result<Vec<Detection>, DetectorError> {
    let (rows, cols) = match shape {
        [1, a, b] => (*a, *b),
        other => {
            return Err(DetectorError::Inference(format!(
                "unexpected output shape {other:?}, want [1, 4 + classes, boxes]"
            )));
        }
    };
    if data.len() != rows * cols {
        return Err(DetectorError::Inference(format!(
            "output holds {} values, shape says {}",
            data.len(),
            rows * cols
        )));
    }

    // The attribute axis is the one matching the configured class count.
    // Models with unnamed classes fall back to the shorter axis.
    let expected = 4 + labels.class_count();
    let transposed = if rows == expected {
        false
    } else if cols == expected {
        true
    } else {
        rows > cols
    };
    let (attrs, boxes) = if transposed { (cols, rows) } else { (rows, cols) };
    if attrs < 5 {
        return Err(DetectorError::Inference(format!(
            "output has {attrs} attributes per box, need at least 5"
        )));
    }
    let at = |attr: usize, i: usize| {
        if transposed { data[i * attrs + attr] } else { data[attr * boxes + i] }
    };

    let (img_w, img_h) = (image_size.0 as f32, image_size.1 as f32);
    let mut candidates = Vec::new();

    for i in 0..boxes {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for c in 0..attrs - 4 {
            let score = at(4 + c, i);
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score <= params.confidence {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let (x1, y1) = lb.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = lb.unmap(cx + w / 2.0, cy + h / 2.0);

        let class_id = best_class as u32;
        candidates.push(Detection {
            x1: x1.clamp(0.0, img_w),
            y1: y1.clamp(0.0, img_h),
            x2: x2.clamp(0.0, img_w),
            y2: y2.clamp(0.0, img_h),
            confidence: best_score,
            class_id,
            class_name: labels.name(class_id),
        });
    }

    Ok(nms(candidates, params.iou))
}

/// Per-class non-maximum suppression. Output is sorted by confidence, highest first.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.iou(&det) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> ClassLabels {
        ClassLabels::new(vec!["infested".into(), "healthy".into()], 0)
    }

    fn det(x1: f32, conf: f32, class_id: u32) -> Detection {
        Detection {
            x1,
            y1: 0.0,
            x2: x1 + 10.0,
            y2: 10.0,
            confidence: conf,
            class_id,
            class_name: String::new(),
        }
    }

    const PARAMS: DecodeParams = DecodeParams { confidence: 0.5, iou: 0.5 };

    #[test]
    fn nms_suppresses_overlapping_same_class() {
        let out = nms(vec![det(0.0, 0.6, 0), det(1.0, 0.9, 0)], 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_other_class() {
        let out = nms(vec![det(0.0, 0.6, 0), det(1.0, 0.9, 1)], 0.5);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 1);
    }

    #[test]
    fn decode_channel_major_output() {
        // 2 classes, 8 candidate boxes (last five empty); layout [1, 6, 8].
        #[rustfmt::skip]
        let data = vec![
            // cx
            100.0, 300.0, 500.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            // cy
            100.0, 300.0, 500.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            // w
            50.0, 50.0, 50.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            // h
            50.0, 50.0, 50.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            // class 0
            0.9, 0.1, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0,
            // class 1
            0.05, 0.8, 0.4, 0.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let lb = Letterbox::for_image(640, 640, 640);
        let out = decode(&data, &[1, 6, 8], &lb, (640, 640), PARAMS, &labels()).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 0);
        assert_eq!(out[0].class_name, "infested");
        assert!((out[0].x1 - 75.0).abs() < 1e-3);
        assert!((out[0].y2 - 125.0).abs() < 1e-3);
        assert_eq!(out[1].class_id, 1);
    }

    #[test]
    fn decode_undoes_letterbox_and_clamps() {
        // Image 1280x720 letterboxed into 640: scale 0.5, pad_y 140.
        let data = vec![
            10.0,  // cx
            150.0, // cy
            40.0,  // w
            20.0,  // h
            0.95,  // class 0
            0.01,  // class 1
        ];
        let lb = Letterbox::for_image(1280, 720, 640);
        let out = decode(&data, &[1, 6, 1], &lb, (1280, 720), PARAMS, &labels()).unwrap();

        assert_eq!(out.len(), 1);
        let d = &out[0];
        assert_eq!(d.x1, 0.0); // (-10 / 0.5) clamped
        assert!((d.x2 - 60.0).abs() < 1e-3);
        assert!((d.y1 - 0.0).abs() < 1e-3);
        assert!((d.y2 - 40.0).abs() < 1e-3);
    }

    #[test]
    fn decode_channel_major_with_fewer_boxes_than_attributes() {
        // [1, attrs=6, boxes=2]
        #[rustfmt::skip]
        let data = vec![
            100.0, 400.0,
            100.0, 400.0,
            20.0, 20.0,
            20.0, 20.0,
            0.9, 0.2,
            0.1, 0.6,
        ];
        let lb = Letterbox::for_image(640, 640, 640);
        let out = decode(&data, &[1, 6, 2], &lb, (640, 640), PARAMS, &labels()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 0);
        assert!((out[0].x1 - 90.0).abs() < 1e-3);
        assert_eq!(out[1].class_id, 1);
        assert!((out[1].x1 - 390.0).abs() < 1e-3);
    }

    #[test]
    fn decode_transposed_output() {
        // [1, boxes=3, attrs=6]: fewer boxes than attributes, still transposed.
        let mut data = vec![0.0f32; 18];
        data[0..6].copy_from_slice(&[320.0, 320.0, 64.0, 64.0, 0.1, 0.7]);
        let lb = Letterbox::for_image(640, 640, 640);
        let out = decode(&data, &[1, 3, 6], &lb, (640, 640), PARAMS, &labels()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 1);
        assert!((out[0].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn decode_falls_back_to_shorter_axis_for_unnamed_classes() {
        // Model has 3 classes, only 2 are named: [1, boxes=8, attrs=7].
        let mut data = vec![0.0f32; 56];
        data[0..7].copy_from_slice(&[320.0, 320.0, 64.0, 64.0, 0.0, 0.0, 0.8]);
        let lb = Letterbox::for_image(640, 640, 640);
        let out = decode(&data, &[1, 8, 7], &lb, (640, 640), PARAMS, &labels()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_name, "class_2");
    }

    #[test]
    fn decode_rejects_bad_shape() {
        let lb = Letterbox::for_image(640, 640, 640);
        assert!(decode(&[0.0; 4], &[4], &lb, (640, 640), PARAMS, &labels()).is_err());
        assert!(decode(&[0.0; 4], &[1, 2, 3], &lb, (640, 640), PARAMS, &labels()).is_err());
    }
}
