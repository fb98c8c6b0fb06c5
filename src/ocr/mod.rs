//! OCR engine seam.
//!
//! Text recognition itself is external. The pipeline hands the engine a
//! grayscale plate crop and receives the raw single-line reading, which is
//! then normalised and validated by [`crate::plate`].

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::GrayImage;

#[cfg(feature = "ocr-tesseract")]
mod tesseract;

#[cfg(feature = "ocr-tesseract")]
pub use tesseract::TesseractOcr;

pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read a single line of text from a grayscale image.
    fn recognize(&self, image: &GrayImage) -> Result<String>;
}

/// Replays queued readings, then the fallback reading.
pub struct ScriptedOcr {
    queue: Mutex<VecDeque<String>>,
    fallback: String,
}

impl ScriptedOcr {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: String::new(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn push(&self, reading: impl Into<String>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(reading.into());
        }
    }
}

impl Default for ScriptedOcr {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(&self, _image: &GrayImage) -> Result<String> {
        let next = self
            .queue
            .lock()
            .map_err(|_| anyhow!("scripted ocr lock poisoned"))?
            .pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}
