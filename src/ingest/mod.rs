//! Frame sources.
//!
//! This module provides the three inputs the monitor can watch:
//! - Webcams (V4L2 devices, feature: ingest-v4l2)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Still images (always available)
//! - Stub sources (`stub://name[?frames=N]`, testing)
//!
//! Every source yields RGB `Frame`s in capture order and reports end of stream
//! with `Ok(None)`. Webcams never end on their own; a still image yields exactly
//! one frame.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod still;
mod synthetic;
pub mod v4l2;

use std::path::PathBuf;

use anyhow::Result;

use crate::frame::{Frame, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};

pub use file::{FileConfig, FileSource};
pub use still::ImageSource;
pub use v4l2::{V4l2Config, V4l2Source};

/// A sequential producer of frames.
pub trait FrameSource {
    /// Human-readable name used in logs.
    fn describe(&self) -> String;

    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn frames_captured(&self) -> u64;

    /// Release the underlying device or file. Later calls to `next_frame`
    /// return `None`.
    fn close(&mut self);

    /// True for sources whose frames are shown at their native size.
    fn is_still(&self) -> bool {
        false
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn frames_captured(&self) -> u64 {
        (**self).frames_captured()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_still(&self) -> bool {
        (**self).is_still()
    }
}

/// Which input a session watches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Device path such as `/dev/video0`, or a `stub://` locator.
    Webcam(String),
    /// Local video path, or a `stub://` locator.
    Video(String),
    Image(PathBuf),
}

impl SourceSpec {
    pub fn label(&self) -> &'static str {
        match self {
            SourceSpec::Webcam(_) => "webcam",
            SourceSpec::Video(_) => "video",
            SourceSpec::Image(_) => "image",
        }
    }
}

/// Capture parameters shared by all sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            target_fps: 30,
        }
    }
}

/// Open the source described by `spec`.
pub fn open_source(spec: &SourceSpec, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let source: Box<dyn FrameSource> = match spec {
        SourceSpec::Webcam(device) => Box::new(V4l2Source::open(V4l2Config {
            device: device.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        })?),
        SourceSpec::Video(path) => Box::new(FileSource::open(FileConfig {
            path: path.clone(),
            width: settings.width,
            height: settings.height,
        })?),
        SourceSpec::Image(path) => Box::new(ImageSource::open(path)?),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_stub_webcam_and_video() -> Result<()> {
        let settings = SourceSettings::default();
        let mut webcam = open_source(&SourceSpec::Webcam("stub://cam".into()), &settings)?;
        assert!(webcam.describe().starts_with("webcam"));
        assert!(!webcam.is_still());
        let frame = webcam.next_frame()?.expect("webcam frame");
        assert_eq!((frame.width(), frame.height()), (640, 480));

        let mut video = open_source(
            &SourceSpec::Video("stub://clip?frames=1".into()),
            &settings,
        )?;
        assert!(video.next_frame()?.is_some());
        assert!(video.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn missing_image_fails_to_open() {
        let spec = SourceSpec::Image(PathBuf::from("/nonexistent/site.jpg"));
        assert!(open_source(&spec, &SourceSettings::default()).is_err());
    }
}
