//! Letterbox preprocessing for square YOLO inputs.
//!
//! The image is scaled to fit `size × size` keeping its aspect ratio, centered
//! on a gray (114) canvas, and flattened to NCHW `f32` in `0..=1`.

use image::{DynamicImage, Rgb, RgbImage, imageops};

const PAD_GRAY: u8 = 114;

/// Geometry of one letterbox transform, used to map boxes back.
///
/// `new_width`/`new_height` are the exact pixel size of the scaled content.
/// Padding is the floor of half the remaining space, so an odd remainder
/// leaves one extra gray row or column on the bottom or right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub size: u32,
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub new_width: u32,
    pub new_height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Letterbox {
    pub fn for_image(width: u32, height: u32, size: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let scale = size as f32 / width.max(height) as f32;
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
        Self {
            size,
            scale,
            width,
            height,
            new_width,
            new_height,
            pad_x: (size - new_width) / 2,
            pad_y: (size - new_height) / 2,
        }
    }

    /// Map a point in model-input space back to original-image space.
    ///
    /// Uses the per-axis ratio of the rounded content size, so the content
    /// edges map exactly onto the image edges.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) * self.width as f32 / self.new_width as f32,
            (y - self.pad_y as f32) * self.height as f32 / self.new_height as f32,
        )
    }
}

/// Letterbox `img` and return the NCHW tensor data together with its geometry.
pub fn prepare(img: &DynamicImage, size: u32) -> (Vec<f32>, Letterbox) {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let lb = Letterbox::for_image(width, height, size);

    let resized =
        imageops::resize(&rgb, lb.new_width, lb.new_height, imageops::FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_GRAY; 3]));
    imageops::replace(&mut canvas, &resized, i64::from(lb.pad_x), i64::from(lb.pad_y));

    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let idx = (y * size + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = f32::from(pixel[c]) / 255.0;
        }
    }

    (data, lb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_image_pads_vertically() {
        let lb = Letterbox::for_image(1280, 720, 640);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 140);
    }

    #[test]
    fn unmap_inverts_scale_and_padding() {
        let lb = Letterbox::for_image(1280, 720, 640);
        let (x, y) = lb.unmap(320.0, 140.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!(y.abs() < 1e-3);
    }

    #[test]
    fn prepare_yields_nchw_with_gray_padding() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([255, 0, 0])));
        let (data, lb) = prepare(&img, 32);
        assert_eq!(data.len(), 3 * 32 * 32);
        assert_eq!(lb.pad_y, 8);

        let plane = 32 * 32;
        // Top-left corner sits in the padding band.
        let pad = f32::from(PAD_GRAY) / 255.0;
        assert!((data[0] - pad).abs() < 1e-6);
        // Center pixel is red: R=1, G=0, B=0.
        let center = 16 * 32 + 16;
        assert!((data[center] - 1.0).abs() < 1e-6);
        assert!(data[plane + center].abs() < 1e-6);
        assert!(data[2 * plane + center].abs() < 1e-6);
    }

    #[test]
    fn odd_remainder_keeps_content_size_exact() {
        // 100x53 into 32: content is 32x17, leaving 15 gray rows (7 above, 8 below).
        let lb = Letterbox::for_image(100, 53, 32);
        assert_eq!((lb.new_width, lb.new_height), (32, 17));
        assert_eq!(lb.pad_y, 7);

        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 53, Rgb([255, 0, 0])));
        let (data, _) = prepare(&img, 32);
        let pad = f32::from(PAD_GRAY) / 255.0;
        let red_rows: Vec<u32> = (0..32)
            .filter(|y| (data[(y * 32 + 16) as usize] - 1.0).abs() < 1e-6)
            .collect();
        assert_eq!(red_rows.first(), Some(&7));
        assert_eq!(red_rows.len(), 17);
        assert!((data[(24 * 32 + 16) as usize] - pad).abs() < 1e-6);

        let (x, y) = lb.unmap(32.0, 24.0);
        assert!((x - 100.0).abs() < 1e-3);
        assert!((y - 53.0).abs() < 1e-3);
        let (_, top) = lb.unmap(0.0, 7.0);
        assert!(top.abs() < 1e-3);
    }
}
