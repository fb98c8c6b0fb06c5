use serde::Serialize;

use crate::geometry::BoundingBox;

/// Semantic class of a detection.
///
/// Backends report numeric class ids; those never travel past the
/// `DetectionAdapter`, which maps them into this enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Face,
    Helmet,
    Rider,
    Plate,
}

impl ObjectClass {
    pub fn label(&self) -> &'static str {
        match self {
            ObjectClass::Face => "face",
            ObjectClass::Helmet => "helmet",
            ObjectClass::Rider => "rider",
            ObjectClass::Plate => "plate",
        }
    }
}

impl std::fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Backend output before class mapping: pixel box in source image space.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(class_id: usize, bbox: [f32; 4], confidence: f32) -> Self {
        Self {
            class_id,
            bbox,
            confidence,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class: ObjectClass,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Stage-one detections of a single frame, split by class.
#[derive(Clone, Debug, Default)]
pub struct PartitionedDetections {
    pub faces: Vec<BoundingBox>,
    pub helmets: Vec<BoundingBox>,
    pub riders: Vec<BoundingBox>,
}

impl PartitionedDetections {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut out = Self::default();
        for det in detections {
            match det.class {
                ObjectClass::Face => out.faces.push(det.bbox),
                ObjectClass::Helmet => out.helmets.push(det.bbox),
                ObjectClass::Rider => out.riders.push(det.bbox),
                ObjectClass::Plate => {}
            }
        }
        out
    }
}
