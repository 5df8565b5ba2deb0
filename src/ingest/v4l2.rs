//! V4L2 webcam source.
//!
//! `V4l2Source` captures frames from a local V4L2 device node (e.g., /dev/video0),
//! with a synthetic fallback for `stub://` devices. Real devices need the
//! ingest-v4l2 feature.
//!
//! A webcam stream never ends on its own; a failed grab is reported as an error
//! and ends the session.

use anyhow::{anyhow, Result};

use super::synthetic::{is_stub, parse_stub, SyntheticStream};
use super::FrameSource;
use crate::frame::{Frame, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. Zero leaves the device default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
        }
    }
}

/// V4L2 frame source.
pub struct V4l2Source {
    device: String,
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(SyntheticStream),
    #[cfg(feature = "ingest-v4l2")]
    Device(Box<device::DeviceV4l2Source>),
    Closed,
}

impl V4l2Source {
    /// Open and start streaming from the device.
    pub fn open(config: V4l2Config) -> Result<Self> {
        let backend = if is_stub(&config.device) {
            let locator = parse_stub(&config.device)?;
            log::info!("V4l2Source: connected to {} (synthetic)", config.device);
            V4l2Backend::Synthetic(SyntheticStream::new(
                config.width,
                config.height,
                locator.frames,
            ))
        } else {
            Self::open_device(&config)?
        };
        Ok(Self {
            device: config.device,
            backend,
        })
    }

    #[cfg(feature = "ingest-v4l2")]
    fn open_device(config: &V4l2Config) -> Result<V4l2Backend> {
        Ok(V4l2Backend::Device(Box::new(
            device::DeviceV4l2Source::connect(config.clone())?,
        )))
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    fn open_device(config: &V4l2Config) -> Result<V4l2Backend> {
        Err(anyhow!(
            "cannot open webcam {}: camera capture requires the ingest-v4l2 feature",
            config.device
        ))
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        format!("webcam {}", self.device)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.next_frame().map(Some),
            V4l2Backend::Closed => Ok(None),
        }
    }

    fn frames_captured(&self) -> u64 {
        match &self.backend {
            V4l2Backend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.frames_captured(),
            V4l2Backend::Closed => 0,
        }
    }

    fn close(&mut self) {
        // Dropping the device stream releases the mmap buffers and the device node.
        self.backend = V4l2Backend::Closed;
        log::debug!("V4l2Source: released {}", self.device);
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
mod device {
    use anyhow::{Context, Result};
    use ouroboros::self_referencing;

    use super::V4l2Config;
    use crate::frame::Frame;

    pub(super) struct DeviceV4l2Source {
        config: V4l2Config,
        state: DeviceV4l2State,
        frame_count: u64,
        active_width: u32,
        active_height: u32,
    }

    #[self_referencing]
    struct DeviceV4l2State {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl DeviceV4l2Source {
        pub(super) fn connect(config: V4l2Config) -> Result<Self> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let mut device = v4l::Device::with_path(&config.device)
                .with_context(|| format!("open v4l2 device {}", config.device))?;
            let mut format = device.format().context("read v4l2 format")?;
            format.width = config.width;
            format.height = config.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");

            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!(
                        "V4l2Source: failed to set format on {}: {}",
                        config.device,
                        err
                    );
                    device
                        .format()
                        .context("read v4l2 format after set failure")?
                }
            };
            if format.fourcc != v4l::FourCC::new(b"RGB3") {
                anyhow::bail!(
                    "v4l2 device {} does not deliver RGB24 frames (got {})",
                    config.device,
                    format.fourcc
                );
            }

            if config.target_fps > 0 {
                let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
                if let Err(err) = device.set_params(&params) {
                    log::warn!(
                        "V4l2Source: failed to set fps on {}: {}",
                        config.device,
                        err
                    );
                }
            }

            let state = DeviceV4l2StateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
                },
            }
            .try_build()?;

            log::info!(
                "V4l2Source: connected to {} ({}x{})",
                config.device,
                format.width,
                format.height
            );
            Ok(Self {
                config,
                state,
                frame_count: 0,
                active_width: format.width,
                active_height: format.height,
            })
        }

        pub(super) fn next_frame(&mut self) -> Result<Frame> {
            use v4l::io::traits::CaptureStream;

            let expected = (self.active_width * self.active_height * 3) as usize;
            let pixels = self
                .state
                .with_mut(|fields| -> Result<Vec<u8>> {
                    let (buf, _meta) = fields.stream.next()?;
                    Ok(buf
                        .get(..expected)
                        .context("v4l2 buffer shorter than the negotiated frame")?
                        .to_vec())
                })
                .with_context(|| format!("failed to grab frame from {}", self.config.device))?;

            self.frame_count += 1;
            Frame::from_rgb(pixels, self.active_width, self.active_height)
        }

        pub(super) fn frames_captured(&self) -> u64 {
            self.frame_count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(device: &str) -> V4l2Config {
        V4l2Config {
            device: device.to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn stub_webcam_produces_frames() -> Result<()> {
        let mut source = V4l2Source::open(stub_config("stub://test"))?;
        let frame = source.next_frame()?.expect("stub webcam frame");
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(source.frames_captured(), 1);
        Ok(())
    }

    #[test]
    fn consecutive_stub_frames_differ() -> Result<()> {
        let mut source = V4l2Source::open(stub_config("stub://test"))?;
        let a = source.next_frame()?.expect("frame");
        let b = source.next_frame()?.expect("frame");
        assert_ne!(a.pixel(0, 0), b.pixel(0, 0));
        Ok(())
    }

    #[test]
    fn closed_webcam_ends_stream() -> Result<()> {
        let mut source = V4l2Source::open(stub_config("stub://test"))?;
        source.close();
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_device_needs_feature() {
        assert!(V4l2Source::open(stub_config("/dev/video0")).is_err());
    }
}
