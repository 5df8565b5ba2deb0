use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use super::glyphs::{glyph, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::detect::BoundingBox;
use crate::frame::Frame;

pub const GREEN: [u8; 3] = [0, 255, 0];
pub const RED: [u8; 3] = [255, 0, 0];
pub const YELLOW: [u8; 3] = [255, 255, 0];
pub const WHITE: [u8; 3] = [255, 255, 255];

/// Hollow box with the given stroke thickness, growing outward from the box edge.
/// Parts outside the frame are clipped.
pub fn draw_box(frame: &mut Frame, bbox: &BoundingBox, color: [u8; 3], thickness: u32) {
    let x = bbox.x_min as i32;
    let y = bbox.y_min as i32;
    let w = bbox.pixel_width();
    let h = bbox.pixel_height();
    if w <= 0 || h <= 0 {
        return;
    }
    for t in 0..thickness.max(1) as i32 {
        let rect = Rect::at(x - t, y - t).of_size((w + 2 * t) as u32, (h + 2 * t) as u32);
        draw_hollow_rect_mut(frame.image_mut(), rect, Rgb(color));
    }
}

/// Render `text` with its baseline-left corner at `(x, y)`.
///
/// Each font pixel becomes a `scale x scale` block. Returns the drawn width in pixels.
pub fn draw_text(frame: &mut Frame, text: &str, x: i32, y: i32, scale: u32, color: [u8; 3]) -> u32 {
    let scale = scale.max(1);
    let top = y - (GLYPH_HEIGHT * scale) as i32;
    let mut pen_x = x;
    for ch in text.chars() {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    let rect = Rect::at(
                        pen_x + (col * scale) as i32,
                        top + (row as u32 * scale) as i32,
                    )
                    .of_size(scale, scale);
                    draw_filled_rect_mut(frame.image_mut(), rect, Rgb(color));
                }
            }
        }
        pen_x += (GLYPH_ADVANCE * scale) as i32;
    }
    text_width(text, scale)
}

/// Width `draw_text` would cover for `text` at `scale`.
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_ADVANCE * scale.max(1)
}
