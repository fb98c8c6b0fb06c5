//! Output resources shared by every frame stream.
//!
//! - The recording writer is created lazily from the first frame that reaches
//!   the encoding step, sized to that frame and the source frame rate. Creation
//!   is a one-time transition under a mutex, so two streams delivering their
//!   first frames at the same moment still produce exactly one writer.
//! - Stream encoding turns an annotated frame into one multipart chunk.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::frame::{encode_jpeg, mjpeg_chunk, DEFAULT_JPEG_QUALITY};

#[cfg(feature = "record-ffmpeg")]
mod ffmpeg;
mod mjpeg;

#[cfg(feature = "record-ffmpeg")]
pub use ffmpeg::FfmpegVideoWriter;
pub use mjpeg::MjpegFileWriter;

/// Frame rate used when the source does not report one.
pub const FALLBACK_FPS: f64 = 25.0;

pub trait VideoWriter: Send {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close. Called once at release.
    fn finish(&mut self) -> Result<()>;
}

/// Parameters a writer is created with.
#[derive(Clone, Debug, PartialEq)]
pub struct WriterSpec {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

pub trait WriterFactory: Send + Sync {
    fn create(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>>;
}

/// Picks the container from the file extension: `.mjpeg`/`.mjpg` are written
/// natively, anything else goes through FFmpeg when `record-ffmpeg` is on.
pub struct DefaultWriterFactory {
    pub jpeg_quality: u8,
}

impl Default for DefaultWriterFactory {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl WriterFactory for DefaultWriterFactory {
    fn create(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>> {
        let ext = spec
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mjpeg" | "mjpg" => Ok(Box::new(MjpegFileWriter::create(spec, self.jpeg_quality)?)),
            #[cfg(feature = "record-ffmpeg")]
            _ => Ok(Box::new(FfmpegVideoWriter::create(spec)?)),
            #[cfg(not(feature = "record-ffmpeg"))]
            _ => Err(anyhow!(
                "recording to '{}' requires the record-ffmpeg feature (or use a .mjpeg path)",
                spec.path.display()
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordingSettings {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("output/processed.mjpeg"),
        }
    }
}

enum WriterState {
    Uninitialized,
    Ready {
        writer: Box<dyn VideoWriter>,
        spec: WriterSpec,
    },
    /// Recording is off, creation failed, or the resources were released.
    Closed,
}

pub struct OutputResources {
    settings: RecordingSettings,
    factory: Box<dyn WriterFactory>,
    jpeg_quality: u8,
    writer: Mutex<WriterState>,
}

impl OutputResources {
    pub fn new(settings: RecordingSettings) -> Self {
        Self::with_factory(settings, Box::new(DefaultWriterFactory::default()))
    }

    pub fn with_factory(settings: RecordingSettings, factory: Box<dyn WriterFactory>) -> Self {
        let state = if settings.enabled {
            WriterState::Uninitialized
        } else {
            WriterState::Closed
        };
        Self {
            settings,
            factory,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            writer: Mutex::new(state),
        }
    }

    /// Outputs that never record.
    pub fn stream_only() -> Self {
        Self::new(RecordingSettings {
            enabled: false,
            path: PathBuf::new(),
        })
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn recording_path(&self) -> &Path {
        &self.settings.path
    }

    /// Append a frame to the recording, creating the writer on first use.
    ///
    /// `source_fps <= 0` falls back to [`FALLBACK_FPS`]. Returns whether the
    /// frame was written.
    pub fn record(&self, frame: &RgbImage, source_fps: f64) -> Result<bool> {
        let mut state = self
            .writer
            .lock()
            .map_err(|_| anyhow!("video writer lock poisoned"))?;
        if let WriterState::Uninitialized = *state {
            let spec = WriterSpec {
                path: self.settings.path.clone(),
                width: frame.width(),
                height: frame.height(),
                fps: effective_fps(source_fps),
            };
            match self.create_writer(&spec) {
                Ok(writer) => {
                    log::info!(
                        "recording to {} ({}x{} @ {:.2} fps)",
                        spec.path.display(),
                        spec.width,
                        spec.height,
                        spec.fps
                    );
                    *state = WriterState::Ready { writer, spec };
                }
                Err(err) => {
                    *state = WriterState::Closed;
                    return Err(err.context("failed to create video writer; recording disabled"));
                }
            }
        }
        match &mut *state {
            WriterState::Ready { writer, .. } => {
                writer.write(frame)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn create_writer(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>> {
        if let Some(parent) = spec.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.factory.create(spec)
    }

    /// Dimensions and rate the writer was created with, once it exists.
    pub fn writer_spec(&self) -> Option<WriterSpec> {
        let state = self.writer.lock().ok()?;
        match &*state {
            WriterState::Ready { spec, .. } => Some(spec.clone()),
            _ => None,
        }
    }

    /// Encode a frame as one multipart stream chunk.
    pub fn encode_chunk(&self, frame: &RgbImage) -> Result<Vec<u8>> {
        let jpeg = encode_jpeg(frame, self.jpeg_quality)?;
        Ok(mjpeg_chunk(&jpeg))
    }

    /// Close the writer. Later calls and later frames are no-ops.
    pub fn release(&self) -> Result<()> {
        let mut state = self
            .writer
            .lock()
            .map_err(|_| anyhow!("video writer lock poisoned"))?;
        let previous = std::mem::replace(&mut *state, WriterState::Closed);
        if let WriterState::Ready { mut writer, spec } = previous {
            writer.finish()?;
            log::info!("recording closed: {}", spec.path.display());
        }
        Ok(())
    }
}

fn effective_fps(source_fps: f64) -> f64 {
    if source_fps.is_finite() && source_fps > 0.0 {
        source_fps
    } else {
        FALLBACK_FPS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingFactory {
        created: Arc<AtomicUsize>,
        written: Arc<AtomicUsize>,
        specs: Arc<Mutex<Vec<WriterSpec>>>,
    }

    struct CountingWriter {
        written: Arc<AtomicUsize>,
    }

    impl VideoWriter for CountingWriter {
        fn write(&mut self, _frame: &RgbImage) -> Result<()> {
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl WriterFactory for CountingFactory {
        fn create(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.specs.lock().unwrap().push(spec.clone());
            Ok(Box::new(CountingWriter {
                written: self.written.clone(),
            }))
        }
    }

    fn settings() -> RecordingSettings {
        RecordingSettings {
            enabled: true,
            path: PathBuf::from("processed.test"),
        }
    }

    #[test]
    fn writer_is_created_once_from_first_frame() -> Result<()> {
        let factory = CountingFactory::default();
        let created = factory.created.clone();
        let written = factory.written.clone();
        let specs = factory.specs.clone();
        let outputs = OutputResources::with_factory(settings(), Box::new(factory));

        assert!(outputs.record(&RgbImage::new(64, 48), 0.0)?);
        assert!(outputs.record(&RgbImage::new(32, 16), 30.0)?);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(written.load(Ordering::SeqCst), 2);
        let spec = specs.lock().unwrap()[0].clone();
        assert_eq!((spec.width, spec.height), (64, 48));
        assert_eq!(spec.fps, FALLBACK_FPS);
        Ok(())
    }

    #[test]
    fn concurrent_first_frames_create_one_writer() {
        let factory = CountingFactory::default();
        let created = factory.created.clone();
        let outputs = OutputResources::with_factory(settings(), Box::new(factory));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| outputs.record(&RgbImage::new(8, 8), 24.0).unwrap());
            }
        });
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(outputs.writer_spec().map(|s| s.fps), Some(24.0));
    }

    #[test]
    fn disabled_recording_never_creates_writer() -> Result<()> {
        let factory = CountingFactory::default();
        let created = factory.created.clone();
        let outputs = OutputResources::with_factory(
            RecordingSettings {
                enabled: false,
                path: PathBuf::from("unused.mjpeg"),
            },
            Box::new(factory),
        );
        assert!(!outputs.record(&RgbImage::new(8, 8), 25.0)?);
        assert_eq!(created.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn release_is_idempotent_and_stops_recording() -> Result<()> {
        let factory = CountingFactory::default();
        let written = factory.written.clone();
        let outputs = OutputResources::with_factory(settings(), Box::new(factory));
        outputs.record(&RgbImage::new(8, 8), 25.0)?;
        outputs.release()?;
        outputs.release()?;
        assert!(!outputs.record(&RgbImage::new(8, 8), 25.0)?);
        assert_eq!(written.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn encode_chunk_wraps_jpeg() -> Result<()> {
        let outputs = OutputResources::stream_only();
        let chunk = outputs.encode_chunk(&RgbImage::new(16, 16))?;
        assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));
        assert!(chunk.ends_with(b"\r\n"));
        Ok(())
    }

    #[cfg(not(feature = "record-ffmpeg"))]
    #[test]
    fn default_factory_rejects_containers_without_encoder() {
        let factory = DefaultWriterFactory::default();
        let spec = WriterSpec {
            path: PathBuf::from("out.mp4"),
            width: 8,
            height: 8,
            fps: 25.0,
        };
        assert!(factory.create(&spec).is_err());
    }
}
