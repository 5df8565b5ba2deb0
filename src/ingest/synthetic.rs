use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Frames produced by a `stub://` video when no `frames=` limit is given.
pub(crate) const DEFAULT_STUB_VIDEO_FRAMES: u64 = 100;

/// Parsed `stub://name[?frames=N]` locator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StubLocator {
    pub name: String,
    pub frames: Option<u64>,
}

pub(crate) fn is_stub(locator: &str) -> bool {
    locator.starts_with("stub://")
}

pub(crate) fn parse_stub(locator: &str) -> Result<StubLocator> {
    let rest = locator
        .strip_prefix("stub://")
        .ok_or_else(|| anyhow!("not a stub locator: {}", locator))?;
    let (name, query) = match rest.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (rest, None),
    };
    let mut frames = None;
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some(("frames", value)) => {
                    frames = Some(value.parse().map_err(|_| {
                        anyhow!("stub frames must be an integer, got '{}'", value)
                    })?);
                }
                _ => return Err(anyhow!("unsupported stub option '{}'", pair)),
            }
        }
    }
    Ok(StubLocator {
        name: name.to_string(),
        frames,
    })
}

/// Generates patterned frames, optionally ending after a fixed count.
pub(crate) struct SyntheticStream {
    width: u32,
    height: u32,
    limit: Option<u64>,
    frame_count: u64,
    /// Simulated "scene" state so consecutive frames differ.
    scene_state: u8,
}

impl SyntheticStream {
    pub(crate) fn new(width: u32, height: u32, limit: Option<u64>) -> Self {
        Self {
            width,
            height,
            limit,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(pixels, self.width, self.height).map(Some)
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stub_frame_limit() -> Result<()> {
        assert_eq!(
            parse_stub("stub://yard?frames=12")?,
            StubLocator {
                name: "yard".to_string(),
                frames: Some(12)
            }
        );
        assert_eq!(parse_stub("stub://cam")?.frames, None);
        assert!(parse_stub("stub://cam?frames=lots").is_err());
        assert!(parse_stub("stub://cam?fps=3").is_err());
        Ok(())
    }

    #[test]
    fn limited_stream_ends() -> Result<()> {
        let mut stream = SyntheticStream::new(8, 6, Some(2));
        assert!(stream.next_frame()?.is_some());
        assert!(stream.next_frame()?.is_some());
        assert!(stream.next_frame()?.is_none());
        assert_eq!(stream.frames_captured(), 2);
        Ok(())
    }
}
