use std::path::Path;

use anyhow::{Context, Result};

use crate::detect::backend::Detector;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Replays a fixed per-frame detection script.
///
/// Frame `i` of a session receives entry `i % len` of the script. An empty
/// script yields no detections on every frame. Used with the `stub://`
/// sources and in tests in place of a real model.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDetector {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Load a script from a JSON file: an array of frames, each an array of detections.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid detection script {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let script: Vec<Vec<Detection>> = serde_json::from_str(raw)?;
        Ok(Self::new(script))
    }

    /// Number of frames in one pass of the script.
    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    /// Restart from the first scripted frame.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn predict(
        &mut self,
        _frame: &Frame,
        _image_size: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let entry = &self.script[self.cursor % self.script.len()];
        self.cursor = self.cursor.wrapping_add(1);

        Ok(entry
            .iter()
            .filter(|det| det.confidence >= confidence_threshold)
            .cloned()
            .collect())
    }

    fn start_session(&mut self) {
        self.rewind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, WearClass};

    fn det(class: WearClass, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), class, confidence)
    }

    #[test]
    fn scripted_detector_cycles_and_filters_confidence() -> Result<()> {
        let mut detector = ScriptedDetector::new(vec![
            vec![det(WearClass::Compliant, 0.9), det(WearClass::NonCompliant, 0.5)],
            vec![],
        ]);
        let frame = Frame::blank(64, 48);

        let first = detector.predict(&frame, 640, 0.7)?;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].class, WearClass::Compliant);

        assert!(detector.predict(&frame, 640, 0.7)?.is_empty());
        assert_eq!(detector.predict(&frame, 640, 0.7)?.len(), 1);

        detector.rewind();
        assert_eq!(detector.predict(&frame, 640, 0.4)?.len(), 2);
        Ok(())
    }

    #[test]
    fn new_session_replays_from_first_entry() -> Result<()> {
        let mut detector = ScriptedDetector::new(vec![
            vec![det(WearClass::NonCompliant, 0.9)],
            vec![],
            vec![],
        ]);
        let frame = Frame::blank(8, 8);
        detector.predict(&frame, 640, 0.7)?;
        detector.predict(&frame, 640, 0.7)?;

        detector.start_session();
        assert_eq!(detector.predict(&frame, 640, 0.7)?.len(), 1);
        Ok(())
    }

    #[test]
    fn empty_script_never_detects() -> Result<()> {
        let mut detector = ScriptedDetector::default();
        let frame = Frame::blank(8, 8);
        assert!(detector.predict(&frame, 640, 0.7)?.is_empty());
        Ok(())
    }
}
