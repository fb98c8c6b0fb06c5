use std::sync::Arc;

use anyhow::{Context, Result};
use image::RgbImage;

use super::backend::{DetectParams, DetectorBackend};
use super::result::{Detection, ObjectClass, RawDetection};
use crate::geometry::BoundingBox;

/// Class table of the rider/face/helmet model, indexed by class id.
const RIDER_STAGE_CLASSES: &[ObjectClass] =
    &[ObjectClass::Face, ObjectClass::Helmet, ObjectClass::Rider];

/// Class table of the plate model.
const PLATE_STAGE_CLASSES: &[ObjectClass] = &[ObjectClass::Plate];

/// The plate stage always runs with a 0.2 floor at 640 px.
pub const PLATE_STAGE_PARAMS: DetectParams = DetectParams {
    confidence: 0.2,
    input_size: 640,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionStage {
    /// Whole frame: faces, helmets and riders.
    Riders,
    /// Rider crop: licence plates.
    Plates,
}

impl DetectionStage {
    fn classes(&self) -> &'static [ObjectClass] {
        match self {
            DetectionStage::Riders => RIDER_STAGE_CLASSES,
            DetectionStage::Plates => PLATE_STAGE_CLASSES,
        }
    }
}

/// Wraps the two detection models behind one `detect(image)` contract.
///
/// This is the only place raw class ids are seen. Everything downstream works
/// with `ObjectClass` and integer pixel boxes clipped to the source image.
#[derive(Clone)]
pub struct DetectionAdapter {
    rider_backend: Arc<dyn DetectorBackend>,
    plate_backend: Arc<dyn DetectorBackend>,
    rider_params: DetectParams,
    plate_params: DetectParams,
}

impl DetectionAdapter {
    pub fn new(
        rider_backend: Arc<dyn DetectorBackend>,
        plate_backend: Arc<dyn DetectorBackend>,
    ) -> Self {
        Self {
            rider_backend,
            plate_backend,
            rider_params: DetectParams::default(),
            plate_params: PLATE_STAGE_PARAMS,
        }
    }

    pub fn with_rider_params(mut self, params: DetectParams) -> Self {
        self.rider_params = params;
        self
    }

    pub fn rider_params(&self) -> DetectParams {
        self.rider_params
    }

    pub fn plate_params(&self) -> DetectParams {
        self.plate_params
    }

    pub fn warm_up(&self) -> Result<()> {
        self.rider_backend.warm_up()?;
        self.plate_backend.warm_up()?;
        Ok(())
    }

    pub fn detect(&self, stage: DetectionStage, image: &RgbImage) -> Result<Vec<Detection>> {
        let (backend, params) = match stage {
            DetectionStage::Riders => (&self.rider_backend, &self.rider_params),
            DetectionStage::Plates => (&self.plate_backend, &self.plate_params),
        };
        let raw = backend
            .detect(image, params)
            .with_context(|| format!("{} backend failed ({:?} stage)", backend.name(), stage))?;
        Ok(raw
            .into_iter()
            .filter_map(|det| map_detection(stage.classes(), det, image.width(), image.height()))
            .collect())
    }

    /// Faces, helmets and riders in a full frame.
    pub fn detect_riders(&self, frame: &RgbImage) -> Result<Vec<Detection>> {
        self.detect(DetectionStage::Riders, frame)
    }

    /// Plates in a rider crop; boxes are relative to the crop.
    pub fn detect_plates(&self, rider_crop: &RgbImage) -> Result<Vec<Detection>> {
        self.detect(DetectionStage::Plates, rider_crop)
    }
}

fn map_detection(
    classes: &[ObjectClass],
    raw: RawDetection,
    width: u32,
    height: u32,
) -> Option<Detection> {
    let Some(class) = classes.get(raw.class_id).copied() else {
        log::debug!("dropping detection with unknown class id {}", raw.class_id);
        return None;
    };
    if raw.bbox.iter().any(|v| !v.is_finite()) {
        log::debug!("dropping {} detection with non-finite box", class);
        return None;
    }
    let [x1, y1, x2, y2] = raw.bbox;
    let bbox = BoundingBox::new(
        x1.min(x2) as i32,
        y1.min(y2) as i32,
        x1.max(x2) as i32,
        y1.max(y2) as i32,
    )
    .clamp_to(width, height);
    let confidence = (raw.confidence.clamp(0.0, 1.0) * 100.0).round() / 100.0;
    Some(Detection {
        class,
        bbox,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedBackend;

    fn adapter(rider: Arc<ScriptedBackend>, plate: Arc<ScriptedBackend>) -> DetectionAdapter {
        DetectionAdapter::new(rider, plate)
    }

    #[test]
    fn maps_class_ids_and_rounds_confidence() -> Result<()> {
        let rider = Arc::new(ScriptedBackend::new("rider"));
        rider.push(vec![
            RawDetection::new(0, [10.7, 10.2, 40.9, 40.0], 0.876),
            RawDetection::new(1, [0.0, 0.0, 5.0, 5.0], 0.5),
            RawDetection::new(2, [0.0, 0.0, 100.0, 200.0], 0.91),
            RawDetection::new(7, [0.0, 0.0, 1.0, 1.0], 0.99),
        ]);
        let plate = Arc::new(ScriptedBackend::new("plate"));
        let adapter = adapter(rider, plate);

        let image = RgbImage::new(640, 480);
        let dets = adapter.detect_riders(&image)?;
        assert_eq!(dets.len(), 3);
        assert_eq!(dets[0].class, ObjectClass::Face);
        assert_eq!(dets[0].bbox, BoundingBox::new(10, 10, 40, 40));
        assert!((dets[0].confidence - 0.88).abs() < 1e-6);
        assert_eq!(dets[1].class, ObjectClass::Helmet);
        assert_eq!(dets[2].class, ObjectClass::Rider);
        Ok(())
    }

    #[test]
    fn clips_boxes_to_image_bounds() -> Result<()> {
        let rider = Arc::new(ScriptedBackend::new("rider"));
        let plate = Arc::new(ScriptedBackend::new("plate"));
        plate.push(vec![RawDetection::new(0, [-4.0, 190.0, 120.0, 230.0], 0.4)]);
        let adapter = adapter(rider, plate);

        let crop = RgbImage::new(100, 200);
        let dets = adapter.detect_plates(&crop)?;
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class, ObjectClass::Plate);
        assert_eq!(dets[0].bbox, BoundingBox::new(0, 190, 100, 200));
        Ok(())
    }

    #[test]
    fn plate_stage_uses_fixed_floor() {
        let rider = Arc::new(ScriptedBackend::new("rider"));
        let plate = Arc::new(ScriptedBackend::new("plate"));
        let adapter = adapter(rider, plate.clone());
        adapter
            .detect_plates(&RgbImage::new(8, 8))
            .expect("scripted detect");
        assert_eq!(
            plate.last_params(),
            Some(DetectParams {
                confidence: 0.2,
                input_size: 640
            })
        );
    }
}
