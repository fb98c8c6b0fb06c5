//! Local video file source.
//!
//! `FileSource` reads frames from a local video file in decode order until the
//! file is exhausted. Real files are decoded by FFmpeg (feature
//! `ingest-file-ffmpeg`). `stub://` locators produce a finite run of
//! synthetic frames for demos and tests:
//!
//! `stub://name?frames=120&width=640&height=480&fps=25`

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::CaptureDevice;
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "Media/test2.mp4") or `stub://` locator.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: Option<FileBackend>,
    path: String,
    frames_read: u64,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open the source. Fails immediately when the file cannot be opened.
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "video source must be a local path or stub:// locator, got '{}'",
                config.path
            ));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticFileSource::parse(&config.path)?)
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegFileSource::open(&config.path)?)
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                return Err(anyhow!(
                    "could not open video '{}': file decoding requires the ingest-file-ffmpeg feature",
                    config.path
                ));
            }
        };
        log::info!("FileSource: opened {}", config.path);
        Ok(Self {
            backend: Some(backend),
            path: config.path,
            frames_read: 0,
        })
    }
}

impl CaptureDevice for FileSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        let frame = match self.backend.as_mut() {
            None => return Ok(None),
            Some(FileBackend::Synthetic(source)) => source.read(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Some(FileBackend::Ffmpeg(source)) => source.read()?,
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    fn fps(&self) -> f64 {
        match self.backend.as_ref() {
            None => 0.0,
            Some(FileBackend::Synthetic(source)) => source.fps,
            #[cfg(feature = "ingest-file-ffmpeg")]
            Some(FileBackend::Ffmpeg(source)) => source.fps(),
        }
    }

    fn release(&mut self) {
        if self.backend.take().is_some() {
            log::info!(
                "FileSource: released {} after {} frames",
                self.path,
                self.frames_read
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    total_frames: u64,
    width: u32,
    height: u32,
    fps: f64,
    produced: u64,
}

impl SyntheticFileSource {
    fn parse(locator: &str) -> Result<Self> {
        let mut source = Self {
            total_frames: 100,
            width: 640,
            height: 480,
            fps: 25.0,
            produced: 0,
        };
        let query = locator.split_once('?').map(|(_, q)| q).unwrap_or("");
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid stub parameter '{}'", pair))?;
            let bad = |_| anyhow!("invalid value for stub parameter '{}': '{}'", key, value);
            match key {
                "frames" => source.total_frames = value.parse().map_err(bad)?,
                "width" => source.width = value.parse().map_err(bad)?,
                "height" => source.height = value.parse().map_err(bad)?,
                "fps" => {
                    source.fps = value
                        .parse()
                        .map_err(|_| anyhow!("invalid value for stub parameter 'fps': '{}'", value))?
                }
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(anyhow!("stub frame size must be non-zero"));
        }
        Ok(source)
    }

    fn read(&mut self) -> Option<RgbImage> {
        if self.produced >= self.total_frames {
            return None;
        }
        self.produced += 1;
        let shift = (self.produced % 256) as u32;
        Some(RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        }))
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
