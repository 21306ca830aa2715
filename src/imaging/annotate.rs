//! Bounding-box overlays and JPEG/base64 encoding.

use std::fs;

use ab_glyph::{FontArc, PxScale};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::debug;

use crate::config::AnnotateConfig;
use crate::detector::{Detection, Status};
use crate::error::AppError;

/// Label font used when `annotate.font_path` is not set.
static FONT_BYTES: &[u8] = include_bytes!("../../fonts/DejaVuSans.ttf");

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// Gap between a label placed below a box and the box's bottom edge.
const LABEL_GAP_BELOW: f32 = 10.0;

pub fn status_color(status: Status) -> Rgb<u8> {
    match status {
        Status::Infested => RED,
        Status::NotInfested => GREEN,
    }
}

/// Draws detections and encodes frames. Built once from config and shared.
pub struct Annotator {
    font: FontArc,
    font_size: f32,
    box_thickness: u32,
    jpeg_quality: u8,
}

impl Annotator {
    pub fn from_config(config: &AnnotateConfig) -> Result<Self, AppError> {
        let font = match &config.font_path {
            Some(path) => {
                let bytes = fs::read(path).map_err(|e| {
                    AppError::Image(format!("cannot read font {}: {e}", path.display()))
                })?;
                let font = FontArc::try_from_vec(bytes).map_err(|e| {
                    AppError::Image(format!("invalid font {}: {e}", path.display()))
                })?;
                debug!(font = %path.display(), "label font loaded");
                font
            }
            None => FontArc::try_from_slice(FONT_BYTES)
                .map_err(|e| AppError::Image(format!("embedded font: {e}")))?,
        };

        Ok(Self {
            font,
            font_size: config.font_size,
            box_thickness: config.box_thickness.max(1),
            jpeg_quality: config.jpeg_quality,
        })
    }

    /// Draw one box in the status colour, with `label` above it when there is
    /// room and below it otherwise.
    pub fn draw(&self, img: &mut RgbImage, det: &Detection, status: Status, label: &str) {
        let color = status_color(status);
        let (w, h) = (img.width() as f32, img.height() as f32);
        let x1 = det.x1.clamp(0.0, w) as i32;
        let y1 = det.y1.clamp(0.0, h) as i32;
        let x2 = det.x2.clamp(0.0, w) as i32;
        let y2 = det.y2.clamp(0.0, h) as i32;

        // Grow inwards so the outline stays inside the box.
        for t in 0..self.box_thickness as i32 {
            let width = (x2 - x1 - 2 * t).max(1) as u32;
            let height = (y2 - y1 - 2 * t).max(1) as u32;
            draw_hollow_rect_mut(img, Rect::at(x1 + t, y1 + t).of_size(width, height), color);
        }

        if label.is_empty() {
            return;
        }
        let above = self.font_size + 2.0 * LABEL_GAP_BELOW;
        let text_y = if det.y1 > above { det.y1 - above } else { det.y2 + LABEL_GAP_BELOW };
        draw_text_mut(
            img,
            color,
            x1,
            text_y as i32,
            PxScale::from(self.font_size),
            &self.font,
            label,
        );
    }

    pub fn encode_jpeg(&self, img: &RgbImage) -> Result<Vec<u8>, AppError> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.jpeg_quality)
            .encode_image(img)
            .map_err(|e| AppError::Image(format!("jpeg encode: {e}")))?;
        Ok(out)
    }

    pub fn encode_jpeg_base64(&self, img: &RgbImage) -> Result<String, AppError> {
        Ok(STANDARD.encode(self.encode_jpeg(img)?))
    }
}

/// `"<STATUS> (<confidence>%)"` with two decimals, e.g. `INFESTED (87.50%)`.
pub fn status_label(status: Status, confidence_percent: f64) -> String {
    format!("{} ({confidence_percent:.2}%)", status.label())
}
