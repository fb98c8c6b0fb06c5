#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectParams, DetectorBackend};
use crate::detect::result::RawDetection;
use crate::geometry::BoundingBox;

const LETTERBOX_FILL: u8 = 114;
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLOv8-style ONNX exports.
///
/// The model is loaded once with a fixed square input. Frames are letterboxed
/// into that square, the `[1, 4 + classes, anchors]` output is decoded, boxes
/// below the confidence floor are dropped, and per-class NMS is applied before
/// boxes are mapped back to source pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded detection model {} (input {}x{})",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self { model, input_size })
    }

    fn build_input(&self, image: &RgbImage) -> Result<(Tensor, Letterbox)> {
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("cannot run detection on an empty image"));
        }
        let letterbox = Letterbox::fit(image.width(), image.height(), self.input_size);
        let resized = image::imageops::resize(
            image,
            letterbox.scaled_width,
            letterbox.scaled_height,
            FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(
            self.input_size,
            self.input_size,
            Rgb([LETTERBOX_FILL; 3]),
        );
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.pad_x),
            i64::from(letterbox.pad_y),
        );

        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok((input.into_tensor(), letterbox))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: &Letterbox,
        params: &DetectParams,
    ) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        // Exports are either [1, 4+nc, anchors] or the transposed [1, anchors, 4+nc].
        let channels_first = shape[1] < shape[2];
        let (channels, anchors) = if channels_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        if channels <= 4 {
            return Err(anyhow!("model output has no class scores: {:?}", shape));
        }
        let at = |channel: usize, anchor: usize| -> f32 {
            if channels_first {
                view[[0, channel, anchor]]
            } else {
                view[[0, anchor, channel]]
            }
        };

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..channels)
                .map(|c| (c - 4, at(c, anchor)))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < params.confidence {
                continue;
            }
            let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            let bbox = letterbox.unmap([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
            candidates.push(RawDetection::new(class_id, bbox, score));
        }

        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, image: &RgbImage, params: &DetectParams) -> Result<Vec<RawDetection>> {
        if params.input_size != self.input_size {
            log::debug!(
                "model compiled for {} px input, ignoring requested {} px",
                self.input_size,
                params.input_size
            );
        }
        let (input, letterbox) = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, &letterbox, params)
    }

    fn warm_up(&self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank, &DetectParams::default()).map(|_| ())
    }
}

#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
    scaled_width: u32,
    scaled_height: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, side: u32) -> Self {
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, side);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, side);
        Self {
            scale,
            pad_x: (side - scaled_width) / 2,
            pad_y: (side - scaled_height) / 2,
            scaled_width,
            scaled_height,
        }
    }

    fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
        [
            (bbox[0] - self.pad_x as f32) / self.scale,
            (bbox[1] - self.pad_y as f32) / self.scale,
            (bbox[2] - self.pad_x as f32) / self.scale,
            (bbox[3] - self.pad_y as f32) / self.scale,
        ]
    }
}

fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(candidates.len());
    for cand in candidates {
        let cand_box = as_box(&cand.bbox);
        let suppressed = kept.iter().any(|k| {
            k.class_id == cand.class_id && as_box(&k.bbox).iou(&cand_box) > iou_threshold
        });
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

fn as_box(bbox: &[f32; 4]) -> BoundingBox {
    BoundingBox::new(
        bbox[0].round() as i32,
        bbox[1].round() as i32,
        bbox[2].round() as i32,
        bbox[3].round() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_round_trips_coordinates() {
        let lb = Letterbox::fit(1280, 720, 640);
        assert_eq!(lb.scaled_width, 640);
        assert_eq!(lb.scaled_height, 360);
        assert_eq!(lb.pad_y, 140);
        let mapped = lb.unmap([0.0, 140.0, 640.0, 500.0]);
        assert!((mapped[2] - 1280.0).abs() < 0.01);
        assert!((mapped[3] - 720.0).abs() < 0.01);
    }

    #[test]
    fn nms_keeps_best_of_overlapping_same_class() {
        let kept = non_max_suppression(
            vec![
                RawDetection::new(0, [0.0, 0.0, 10.0, 10.0], 0.6),
                RawDetection::new(0, [1.0, 1.0, 10.0, 10.0], 0.9),
                RawDetection::new(1, [1.0, 1.0, 10.0, 10.0], 0.5),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
    }
}
