//! RGB frame container shared by sources, detectors, the annotator and sinks.
//!
//! - `Frame`: owned RGB8 raster, mutated in place by the annotator.
//! - Sources hand frames over by value; nothing retains a frame past its loop iteration.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;

/// Default frame width every stream frame is resized to before detection.
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
/// Default frame height every stream frame is resized to before detection.
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

/// Owned RGB8 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Wrap packed RGB24 bytes. Fails when the buffer does not match `width * height * 3`.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer rejected for {}x{}", width, height))?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    /// Black frame.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
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

    /// Pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x < self.width() && y < self.height() {
            Some(self.image.get_pixel(x, y).0)
        } else {
            None
        }
    }

    /// Resize to exactly `width x height`. A frame already at that size is returned unchanged.
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.width() == width && self.height() == height {
            return self;
        }
        Self {
            image: image::imageops::resize(&self.image, width, height, FilterType::Triangle),
        }
    }

    /// Encode to disk; the format follows the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.image
            .save(path)
            .with_context(|| format!("failed to write frame to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2).is_err());
        let frame = Frame::from_rgb(vec![7u8; 12], 2, 2).unwrap();
        assert_eq!(frame.pixel(1, 1), Some([7, 7, 7]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn resize_hits_target_dimensions() {
        let frame = Frame::blank(1280, 720).resized(DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT);
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
    }
}
