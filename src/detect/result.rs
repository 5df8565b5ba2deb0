use serde::Deserialize;

/// Wear classification produced by the detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WearClass {
    /// Head with a helmet.
    #[serde(alias = "helmet")]
    Compliant,
    /// Bare head.
    #[serde(alias = "no_helmet", alias = "head")]
    NonCompliant,
}

impl WearClass {
    /// Map a model class index. Index 0 is helmet, index 1 is a bare head.
    pub fn from_class_id(class_id: usize) -> Option<Self> {
        match class_id {
            0 => Some(WearClass::Compliant),
            1 => Some(WearClass::NonCompliant),
            _ => None,
        }
    }

    /// Human-readable name used in frame labels.
    pub fn label(self) -> &'static str {
        match self {
            WearClass::Compliant => "Helmet",
            WearClass::NonCompliant => "No Helmet",
        }
    }
}

/// Axis-aligned box in pixel coordinates of the frame it was detected on.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(from = "[f32; 4]")]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Width truncated to whole pixels.
    pub fn pixel_width(&self) -> i32 {
        (self.x_max - self.x_min) as i32
    }

    /// Height truncated to whole pixels.
    pub fn pixel_height(&self) -> i32 {
        (self.y_max - self.y_min) as i32
    }

    pub fn area(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0) * (self.y_max - self.y_min).max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let iy = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// A single detected head. Produced fresh per frame and dropped after annotation.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Detection {
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
    pub class: WearClass,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bounding_box: BoundingBox, class: WearClass, confidence: f32) -> Self {
        Self {
            bounding_box,
            class,
            confidence,
        }
    }
}
