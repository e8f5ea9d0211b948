//! Frames and detections as they come off the device.
//!
//! - `Frame`: decoded RGB buffer owned by a single loop iteration.
//! - `Detection`: one predicted object with normalized (0..1) box coordinates.
//! - `DetectionBatch`: all detections from one inference pass.
//! - `frame_norm`: maps normalized boxes to pixel coordinates.

use image::{Rgb, RgbImage};

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded image buffer with known pixel dimensions.
///
/// Frames are not `Clone`: each one is moved out of the frame queue, drawn on
/// in place, shown, then dropped at the end of the iteration.
#[derive(Debug)]
pub struct Frame {
    image: RgbImage,
    /// Sequence number assigned by the producer.
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Solid-color frame, mostly useful for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, color: [u8; 3], sequence: u64) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb(color)), sequence)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }
}

// ----------------------------------------------------------------------------
// Detections
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    /// Index into the model's label map.
    pub label: u32,
    /// Confidence in 0..=1.
    pub confidence: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Detection {
    /// Normalized box as `[xmin, ymin, xmax, ymax]`.
    pub fn bbox(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

/// Detections produced by one inference pass, in output order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    pub sequence: u64,
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(sequence: u64, detections: Vec<Detection>) -> Self {
        Self {
            sequence,
            detections,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Coordinate mapping
// ----------------------------------------------------------------------------

/// Convert a normalized bounding box to pixel coordinates.
///
/// Every component is clamped to `[0, 1]` first; x components (0 and 2) scale
/// by `width`, y components (1 and 3) by `height`. Fractions are truncated.
pub fn frame_norm(width: u32, height: u32, bbox: [f32; 4]) -> [i32; 4] {
    let mut out = [0i32; 4];
    for (i, value) in bbox.iter().enumerate() {
        let scale = if i % 2 == 0 { width as f32 } else { height as f32 };
        // NaN survives clamp and then casts to 0.
        out[i] = (value.clamp(0.0, 1.0) * scale) as i32;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_norm_scales_x_by_width_and_y_by_height() {
        let px = frame_norm(640, 480, [0.25, 0.5, 0.75, 1.0]);
        assert_eq!(px, [160, 240, 480, 480]);
    }

    #[test]
    fn frame_norm_clamps_out_of_range_components() {
        let px = frame_norm(320, 320, [-0.2, 0.5, 1.3, 0.9]);
        assert_eq!(px, [0, 160, 320, 288]);
    }

    #[test]
    fn frame_norm_truncates_fractional_pixels() {
        let px = frame_norm(100, 100, [0.129, 0.999, 0.5, 0.0]);
        assert_eq!(px, [12, 99, 50, 0]);
    }

    #[test]
    fn frame_norm_maps_nan_to_zero() {
        let px = frame_norm(100, 100, [f32::NAN, 0.5, 0.5, 0.5]);
        assert_eq!(px[0], 0);
    }

    #[test]
    fn filled_frame_reports_dimensions() {
        let frame = Frame::filled(32, 16, [1, 2, 3], 7);
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 16);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.image().get_pixel(0, 0).0, [1, 2, 3]);
    }
}
