use anyhow::Result;
use image::RgbImage;

/// Per-call inference parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectParams {
    /// Minimum confidence a box must reach to be reported.
    pub confidence: f32,
    /// Square network input size the image is letterboxed to.
    pub input_size: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            input_size: 640,
        }
    }
}

/// Object detection model seam.
///
/// `detect` takes `&self` so that several frame streams can run inference on
/// the same model without serialising on it. Implementations that wrap a
/// stateful engine guard it internally.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB image. Boxes are in the image's pixel space.
    fn detect(&self, image: &RgbImage, params: &DetectParams) -> Result<Vec<super::RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
