use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Backends receive an RGB frame and return boxes in that frame's pixel
/// coordinates. Detections below `confidence_threshold` must not be returned.
pub trait Detector {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// `image_size` is the square model input edge the frame is resized to
    /// internally; returned boxes are scaled back to the frame.
    fn predict(
        &mut self,
        frame: &Frame,
        image_size: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called before the first frame of every session.
    fn start_session(&mut self) {}
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn predict(
        &mut self,
        frame: &Frame,
        image_size: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        (**self).predict(frame, image_size, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }

    fn start_session(&mut self) {
        (**self).start_session()
    }
}
