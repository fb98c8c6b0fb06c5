//! Capture devices.
//!
//! A capture device yields decoded RGB frames in order until the source is
//! exhausted. Decoding is external (FFmpeg behind the `ingest-file-ffmpeg`
//! feature); `stub://` locators produce synthetic frames, and `MemorySource`
//! replays a fixed list of images.
//!
//! Devices are single-owner. The pipeline keeps its device behind one mutex
//! and only holds that lock for the duration of a `read` call.

use std::collections::VecDeque;

use anyhow::Result;
use image::RgbImage;

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{FileConfig, FileSource};

pub trait CaptureDevice: Send {
    /// Next decoded frame, or `None` once the source is exhausted.
    fn read(&mut self) -> Result<Option<RgbImage>>;

    /// Frame rate reported by the source; `0.0` when unknown.
    fn fps(&self) -> f64;

    /// Close the underlying source. Reads after release return `None`.
    fn release(&mut self);
}

/// In-memory device replaying a fixed list of images.
pub struct MemorySource {
    frames: VecDeque<RgbImage>,
    fps: f64,
    released: bool,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        Self {
            frames: frames.into(),
            fps,
            released: false,
        }
    }
}

impl CaptureDevice for MemorySource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.released {
            return Ok(None);
        }
        Ok(self.frames.pop_front())
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn release(&mut self) {
        self.released = true;
        self.frames.clear();
    }
}
