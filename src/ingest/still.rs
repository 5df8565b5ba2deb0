//! Still image source.
//!
//! Decodes a JPEG/PNG once and yields it as a single frame at its native size.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::FrameSource;
use crate::frame::Frame;

pub struct ImageSource {
    path: PathBuf,
    pending: Option<Frame>,
    frame_count: u64,
}

impl ImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        let decoded = image::open(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        let frame = Frame::from_image(decoded.to_rgb8());
        log::info!(
            "ImageSource: loaded {} ({}x{})",
            path.display(),
            frame.width(),
            frame.height()
        );
        Ok(Self {
            path: path.to_path_buf(),
            pending: Some(frame),
            frame_count: 0,
        })
    }
}

impl FrameSource for ImageSource {
    fn describe(&self) -> String {
        format!("image {}", self.path.display())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.pending.take();
        if frame.is_some() {
            self.frame_count += 1;
        }
        Ok(frame)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn close(&mut self) {
        self.pending = None;
    }

    fn is_still(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_one_frame_at_native_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gate.png");
        image::RgbImage::from_pixel(33, 21, image::Rgb([10, 20, 30])).save(&path)?;

        let mut source = ImageSource::open(&path)?;
        let frame = source.next_frame()?.expect("image frame");
        assert_eq!((frame.width(), frame.height()), (33, 21));
        assert_eq!(frame.pixel(0, 0), Some([10, 20, 30]));
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.frames_captured(), 1);
        Ok(())
    }

    #[test]
    fn unreadable_file_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image")?;
        assert!(ImageSource::open(&path).is_err());
        Ok(())
    }
}
