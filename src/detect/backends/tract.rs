#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, WearClass};
use crate::frame::Frame;

const DEFAULT_NMS_IOU: f32 = 0.45;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Expects a square `1x3xSxS` input and a `1x(4+nc)xN` output where each
/// column is `cx, cy, w, h` followed by per-class scores. Class 0 is helmet,
/// class 1 is a bare head; other classes are ignored.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    image_size: u32,
    nms_iou: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, image_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = image_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            image_size,
            nms_iou: DEFAULT_NMS_IOU,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.image_size;
        let resized = image::imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a rank-3 YOLO output")?;
        let (batch, rows, anchors) = view.dim();
        if batch != 1 || rows < 5 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", view.shape()));
        }
        let classes = rows - 4;

        let scale_x = frame.width() as f32 / self.image_size as f32;
        let scale_y = frame.height() as f32 / self.image_size as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let (mut best_class, mut best_score) = (0usize, f32::NEG_INFINITY);
            for c in 0..classes {
                let score = view[[0, 4 + c, a]];
                if score > best_score {
                    best_class = c;
                    best_score = score;
                }
            }
            if best_score < confidence_threshold {
                continue;
            }
            let Some(class) = WearClass::from_class_id(best_class) else {
                continue;
            };
            let (cx, cy, w, h) = (
                view[[0, 0, a]],
                view[[0, 1, a]],
                view[[0, 2, a]],
                view[[0, 3, a]],
            );
            let bbox = BoundingBox::new(
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            );
            candidates.push(Detection::new(bbox, class, best_score));
        }

        Ok(non_max_suppression(candidates, self.nms_iou))
    }
}

/// Per-class greedy NMS, highest confidence first.
pub(crate) fn non_max_suppression(mut candidates: Vec<Detection>, iou: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for cand in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class == cand.class && k.bounding_box.iou(&cand.bounding_box) > iou
        });
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(
        &mut self,
        frame: &Frame,
        image_size: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        if image_size != self.image_size {
            return Err(anyhow!(
                "requested image size {} does not match model input {}",
                image_size,
                self.image_size
            ));
        }
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, confidence_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_overlapping_box_per_class() {
        let a = Detection::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), WearClass::Compliant, 0.9);
        let b = Detection::new(BoundingBox::new(5.0, 5.0, 100.0, 100.0), WearClass::Compliant, 0.8);
        let c = Detection::new(BoundingBox::new(5.0, 5.0, 100.0, 100.0), WearClass::NonCompliant, 0.75);
        let kept = non_max_suppression(vec![b, c, a], 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class, WearClass::NonCompliant);
    }
}
