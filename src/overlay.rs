//! Detection overlay drawing.

use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::error::LabelError;
use crate::font::{draw_text_mut, text_width};
use crate::frame::{frame_norm, DetectionBatch, Frame};
use crate::model::LabelMap;

/// Colors, text scales and offsets used by `OverlayRenderer`.
#[derive(Clone, Debug)]
pub struct OverlayStyle {
    pub box_color: Rgb<u8>,
    pub box_thickness: u32,
    pub text_color: Rgb<u8>,
    pub label_scale: u32,
    pub fps_scale: u32,
    /// Label baseline, pixels below the box bottom edge.
    pub label_offset: i32,
    /// Confidence baseline, pixels below the box bottom edge.
    pub confidence_offset: i32,
    /// fps baseline as (x from the left edge, y from the bottom edge).
    pub fps_anchor: (i32, i32),
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_color: Rgb([255, 0, 0]),
            box_thickness: 2,
            text_color: Rgb([255, 255, 255]),
            label_scale: 1,
            fps_scale: 2,
            label_offset: 13,
            confidence_offset: 25,
            fps_anchor: (4, 10),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Draw every detection in `batch` and the fps readout onto `frame`.
    ///
    /// Labels are resolved before anything is drawn, so an unknown label index
    /// leaves the frame untouched.
    pub fn render(
        &self,
        frame: &mut Frame,
        batch: &DetectionBatch,
        labels: &LabelMap,
        fps: f64,
    ) -> Result<(), LabelError> {
        let resolved = batch
            .detections
            .iter()
            .map(|det| labels.resolve(det.label).map(|name| (det, name)))
            .collect::<Result<Vec<_>, _>>()?;

        let (width, height) = (frame.width(), frame.height());
        let style = &self.style;
        let img = frame.image_mut();

        for (det, name) in resolved {
            let [x0, y0, x1, y1] = frame_norm(width, height, det.bbox());
            draw_text_mut(
                img,
                name,
                text_x(x0, name, style.label_scale, width),
                y1 + style.label_offset,
                style.label_scale,
                style.text_color,
            );
            let confidence = format!("{}", round2(det.confidence as f64));
            draw_text_mut(
                img,
                &confidence,
                text_x(x0, &confidence, style.label_scale, width),
                y1 + style.confidence_offset,
                style.label_scale,
                style.text_color,
            );
            draw_box(img, [x0, y0, x1, y1], style.box_color, style.box_thickness);
        }

        let (fps_x, fps_y) = style.fps_anchor;
        draw_text_mut(
            img,
            &format!("fps: {}", round2(fps)),
            fps_x,
            height as i32 - fps_y,
            style.fps_scale,
            style.text_color,
        );
        Ok(())
    }
}

fn draw_box(img: &mut image::RgbImage, bbox: [i32; 4], color: Rgb<u8>, thickness: u32) {
    let [x0, y0, x1, y1] = bbox;
    let w = (x1 - x0).max(1) as u32;
    let h = (y1 - y0).max(1) as u32;
    for offset in 0..thickness.max(1) as i32 {
        let rect = Rect::at(x0 - offset, y0 - offset)
            .of_size(w + 2 * offset as u32, h + 2 * offset as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// Left edge for `text` starting at `x`, shifted left so it ends on-frame.
fn text_x(x: i32, text: &str, scale: u32, frame_width: u32) -> i32 {
    let room = frame_width as i32 - text_width(text, scale.max(1)) as i32;
    x.min(room).max(0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
