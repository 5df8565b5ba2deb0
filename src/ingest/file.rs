//! Local video file source.
//!
//! `FileSource` reads frames sequentially from a local video file and reports
//! end of stream once the file is exhausted:
//! - `stub://name[?frames=N]` produces a finite synthetic clip (tests, demos)
//! - real paths decode through FFmpeg (feature: ingest-file-ffmpeg)
//!
//! URL schemes other than `stub://` are rejected.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{is_stub, parse_stub, SyntheticStream, DEFAULT_STUB_VIDEO_FRAMES};
use super::FrameSource;
use crate::frame::{Frame, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "clips/site_entrance.mp4").
    pub path: String,
    /// Synthetic frame width (decoded files keep their own size).
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticStream),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(Box<FfmpegFileSource>),
    Closed,
}

impl FileSource {
    /// Open the file. Fails when the path is unusable or cannot be decoded.
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if is_stub(&config.path) {
            let locator = parse_stub(&config.path)?;
            log::info!("FileSource: opened {} (synthetic)", config.path);
            FileBackend::Synthetic(SyntheticStream::new(
                config.width,
                config.height,
                Some(locator.frames.unwrap_or(DEFAULT_STUB_VIDEO_FRAMES)),
            ))
        } else {
            Self::open_decoder(&config)?
        };
        Ok(Self {
            path: config.path,
            backend,
        })
    }

    #[cfg(feature = "ingest-file-ffmpeg")]
    fn open_decoder(config: &FileConfig) -> Result<FileBackend> {
        Ok(FileBackend::Ffmpeg(Box::new(FfmpegFileSource::open(
            &config.path,
        )?)))
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    fn open_decoder(config: &FileConfig) -> Result<FileBackend> {
        Err(anyhow!(
            "cannot decode {}: video files require the ingest-file-ffmpeg feature",
            config.path
        ))
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        format!("video {}", self.path)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
            FileBackend::Closed => Ok(None),
        }
    }

    fn frames_captured(&self) -> u64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_captured(),
            FileBackend::Closed => 0,
        }
    }

    fn close(&mut self) {
        self.backend = FileBackend::Closed;
        log::debug!("FileSource: closed {}", self.path);
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if is_stub(path) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(path: &str) -> FileConfig {
        FileConfig {
            path: path.to_string(),
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn stub_video_ends_after_limit() -> Result<()> {
        let mut source = FileSource::open(stub_config("stub://clip?frames=3"))?;
        let mut frames = 0;
        while let Some(frame) = source.next_frame()? {
            assert_eq!((frame.width(), frame.height()), (64, 48));
            frames += 1;
        }
        assert_eq!(frames, 3);
        assert_eq!(source.frames_captured(), 3);
        Ok(())
    }

    #[test]
    fn remote_and_empty_paths_are_rejected() {
        assert!(FileSource::open(stub_config("http://example.com/a.mp4")).is_err());
        assert!(FileSource::open(stub_config("  ")).is_err());
    }

    #[test]
    fn closed_source_reports_end_of_stream() -> Result<()> {
        let mut source = FileSource::open(stub_config("stub://clip"))?;
        source.close();
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn real_file_needs_decoder_feature() {
        let err = FileSource::open(stub_config("clips/a.mp4")).err().unwrap();
        assert!(err.to_string().contains("ingest-file-ffmpeg"));
    }
}
