//! Frame production loop.
//!
//! A [`Pipeline`] owns the capture device and everything a frame passes
//! through: detection, association, plate extraction, annotation, recording
//! and stream encoding. Frames are pulled one at a time through
//! [`Pipeline::process_next`] or a [`FrameStream`].
//!
//! Only the device read (and the frame counter bump that goes with it) happens
//! under the capture lock. Once a frame leaves the lock it belongs to the
//! caller that read it, so concurrent streams never see the same frame and do
//! not wait on each other's detection or OCR work.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::annotate::{annotate_detection, annotate_plate, Annotation};
use crate::detect::{Detection, DetectionAdapter, PartitionedDetections};
use crate::diagnostics::RejectionLog;
use crate::frame::{crop, encode_jpeg, to_grayscale, Frame, DEFAULT_JPEG_QUALITY};
use crate::geometry::BoundingBox;
use crate::ingest::CaptureDevice;
use crate::ocr::OcrEngine;
use crate::output::OutputResources;
use crate::plate;
use crate::storage::{PersistenceSink, PlateRecord};

mod builder;

pub use builder::open_pipeline;

/// How snap files are named when a frame yields more than one plate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapNaming {
    /// `plate_<frame>.jpg` for every plate; later plates overwrite earlier ones.
    PerFrame,
    /// `plate_<frame>.jpg`, then `plate_<frame>_1.jpg`, `plate_<frame>_2.jpg`, ...
    #[default]
    PerViolation,
}

impl SnapNaming {
    pub fn file_name(&self, frame_index: u64, seq: usize) -> String {
        match self {
            SnapNaming::PerViolation if seq > 0 => format!("plate_{}_{}.jpg", frame_index, seq),
            _ => format!("plate_{}.jpg", frame_index),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SnapSettings {
    pub dir: PathBuf,
    pub naming: SnapNaming,
}

impl Default for SnapSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("Snaps"),
            naming: SnapNaming::default(),
        }
    }
}

impl SnapSettings {
    pub fn path_for(&self, frame_index: u64, seq: usize) -> PathBuf {
        self.dir.join(self.naming.file_name(frame_index, seq))
    }
}

/// An accepted plate read.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlateRead {
    pub text: String,
    /// Frame-absolute position.
    pub bbox: BoundingBox,
    pub snap_path: PathBuf,
}

/// What happened to one frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameReport {
    pub detections: Vec<Detection>,
    pub violations: Vec<BoundingBox>,
    pub plates: Vec<PlateRead>,
    /// Raw OCR text that matched no plate grammar.
    pub rejected: Vec<String>,
    pub annotations: Vec<Annotation>,
    pub recorded: bool,
}

pub struct ProcessedFrame {
    pub index: u64,
    /// Multipart chunk, or `None` when encoding failed.
    pub chunk: Option<Vec<u8>>,
    pub report: FrameReport,
}

struct CaptureState {
    device: Option<Box<dyn CaptureDevice>>,
    frame_count: u64,
}

pub struct Pipeline {
    capture: Mutex<CaptureState>,
    adapter: DetectionAdapter,
    ocr: Arc<dyn OcrEngine>,
    outputs: OutputResources,
    sink: PersistenceSink,
    rejections: RejectionLog,
    snaps: SnapSettings,
}

impl Pipeline {
    /// A pipeline that streams only: no recording, no storage, no rejection
    /// log. Use the `with_*` methods to attach those.
    pub fn new(
        device: Box<dyn CaptureDevice>,
        adapter: DetectionAdapter,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        Self {
            capture: Mutex::new(CaptureState {
                device: Some(device),
                frame_count: 0,
            }),
            adapter,
            ocr,
            outputs: OutputResources::stream_only(),
            sink: PersistenceSink::disabled(),
            rejections: RejectionLog::discard(),
            snaps: SnapSettings::default(),
        }
    }

    pub fn with_outputs(mut self, outputs: OutputResources) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_persistence(mut self, sink: PersistenceSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_rejection_log(mut self, log: RejectionLog) -> Self {
        self.rejections = log;
        self
    }

    pub fn with_snaps(mut self, snaps: SnapSettings) -> Self {
        self.snaps = snaps;
        self
    }

    pub fn adapter(&self) -> &DetectionAdapter {
        &self.adapter
    }

    pub fn outputs(&self) -> &OutputResources {
        &self.outputs
    }

    pub fn snaps_dir(&self) -> &Path {
        &self.snaps.dir
    }

    /// Frames read from the device so far.
    pub fn frames_read(&self) -> u64 {
        self.capture
            .lock()
            .map(|state| state.frame_count)
            .unwrap_or(0)
    }

    /// Lazy chunk stream borrowing this pipeline.
    pub fn frames(&self) -> FrameStream<&Pipeline> {
        FrameStream::new(self)
    }

    /// Lazy chunk stream holding a shared handle, for use on another thread.
    pub fn stream(self: &Arc<Self>) -> FrameStream<Arc<Pipeline>> {
        FrameStream::new(Arc::clone(self))
    }

    /// Read and fully process the next frame.
    ///
    /// `Ok(None)` means the source is exhausted (or released). An `Err` comes
    /// only from the device itself; everything that goes wrong inside a frame
    /// is logged and contained.
    pub fn process_next(&self) -> Result<Option<ProcessedFrame>> {
        let Some((frame, fps)) = self.read_frame()? else {
            return Ok(None);
        };
        Ok(Some(self.process_frame(frame, fps)))
    }

    fn read_frame(&self) -> Result<Option<(Frame, f64)>> {
        let mut state = self
            .capture
            .lock()
            .map_err(|_| anyhow!("capture lock poisoned"))?;
        let Some(device) = state.device.as_mut() else {
            return Ok(None);
        };
        let Some(image) = device.read().context("capture device read failed")? else {
            return Ok(None);
        };
        let fps = device.fps();
        state.frame_count += 1;
        Ok(Some((Frame::new(state.frame_count, image), fps)))
    }

    fn process_frame(&self, mut frame: Frame, fps: f64) -> ProcessedFrame {
        let index = frame.index;
        let mut report = FrameReport::default();

        log::trace!("frame {}: detecting", index);
        report.detections = match self.adapter.detect_riders(&frame.image) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("frame {}: detection failed: {:#}", index, err);
                Vec::new()
            }
        };

        log::trace!("frame {}: associating", index);
        let parts = PartitionedDetections::from_detections(&report.detections);
        let violations = parts.violations();
        // plate crops come from the frame as read, not the annotated one
        let pristine = (!violations.is_empty()).then(|| frame.image.clone());

        log::trace!("frame {}: annotating", index);
        for det in &report.detections {
            report
                .annotations
                .push(annotate_detection(&mut frame.image, det));
        }

        if let Some(source) = pristine.as_ref() {
            log::trace!("frame {}: extracting plates", index);
            for rider in &violations {
                self.extract_plates(index, source, rider, &mut frame.image, &mut report);
            }
        }
        report.violations = violations;

        log::debug!(
            "frame {}: {} detections, {} violations, {} plates, {} rejected",
            index,
            report.detections.len(),
            report.violations.len(),
            report.plates.len(),
            report.rejected.len()
        );

        log::trace!("frame {}: encoding", index);
        report.recorded = match self.outputs.record(&frame.image, fps) {
            Ok(recorded) => recorded,
            Err(err) => {
                log::warn!("frame {}: {:#}", index, err);
                false
            }
        };
        let chunk = match self.outputs.encode_chunk(&frame.image) {
            Ok(chunk) => Some(chunk),
            Err(err) => {
                log::warn!("frame {}: dropped from stream: {:#}", index, err);
                None
            }
        };

        ProcessedFrame {
            index,
            chunk,
            report,
        }
    }

    fn extract_plates(
        &self,
        index: u64,
        source: &RgbImage,
        rider: &BoundingBox,
        canvas: &mut RgbImage,
        report: &mut FrameReport,
    ) {
        let Some(rider_crop) = crop(source, rider) else {
            return;
        };
        let plates = match self.adapter.detect_plates(&rider_crop) {
            Ok(plates) => plates,
            Err(err) => {
                log::warn!("frame {}: plate detection failed: {:#}", index, err);
                return;
            }
        };
        for det in plates {
            let Some(plate_crop) = crop(&rider_crop, &det.bbox) else {
                continue;
            };
            let raw = match self.ocr.recognize(&to_grayscale(&plate_crop)) {
                Ok(raw) => raw.trim().to_string(),
                Err(err) => {
                    log::warn!("frame {}: OCR failed: {:#}", index, err);
                    continue;
                }
            };
            log::debug!("frame {}: OCR read {:?}", index, raw);

            let Some(validated) = plate::validate(&raw) else {
                if !raw.is_empty() {
                    if let Err(err) = self.rejections.record(index, &raw) {
                        log::warn!("frame {}: rejection log: {:#}", index, err);
                    }
                }
                report.rejected.push(raw);
                continue;
            };

            let snap_path = self.snaps.path_for(index, report.plates.len());
            if let Err(err) = save_snap(&plate_crop, &snap_path) {
                log::warn!("frame {}: {:#}", index, err);
            }
            let record = PlateRecord {
                frame_number: index,
                plate_text: validated.text.clone(),
                plate_image_path: snap_path.to_string_lossy().into_owned(),
                detected_at: chrono::Local::now().naive_local(),
            };
            if let Err(err) = self.sink.write(&record) {
                log::warn!("frame {}: plate {} not persisted: {:#}", index, record.plate_text, err);
            }

            let absolute = det.bbox.offset(rider.x1, rider.y1);
            report
                .annotations
                .push(annotate_plate(canvas, &absolute, &validated.text));
            log::info!(
                "frame {}: plate {} ({})",
                index,
                validated.text,
                validated.grammar.name()
            );
            report.plates.push(PlateRead {
                text: validated.text,
                bbox: absolute,
                snap_path,
            });
        }
    }

    /// Release the device, close the recording and the storage connection.
    ///
    /// Runs under the capture lock, so a caller mid-read finishes first.
    /// Later calls are no-ops.
    pub fn release(&self) -> Result<()> {
        let mut state = self
            .capture
            .lock()
            .map_err(|_| anyhow!("capture lock poisoned"))?;
        let Some(mut device) = state.device.take() else {
            return Ok(());
        };
        device.release();
        let outputs = self.outputs.release();
        let sink = self.sink.close();
        log::info!("pipeline released after {} frames", state.frame_count);
        outputs?;
        sink
    }
}

fn save_snap(plate_crop: &RgbImage, path: &Path) -> Result<()> {
    let jpeg = encode_jpeg(plate_crop, DEFAULT_JPEG_QUALITY)?;
    std::fs::write(path, jpeg).with_context(|| format!("write snap {}", path.display()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamState {
    Idle,
    Producing,
    Ended,
}

/// Pull-based sequence of multipart chunks.
///
/// Each `next()` reads and processes exactly one device frame (more only when
/// a frame fails to encode). Nothing runs between pulls. Dropping the stream
/// stops it; the device stays open until [`Pipeline::release`].
pub struct FrameStream<P: Deref<Target = Pipeline>> {
    pipeline: P,
    state: StreamState,
    yielded: u64,
}

impl<P: Deref<Target = Pipeline>> FrameStream<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            state: StreamState::Idle,
            yielded: 0,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state == StreamState::Ended
    }

    /// Chunks handed out by this stream.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    fn end(&mut self) {
        log::trace!("stream ended after {} chunks", self.yielded);
        self.state = StreamState::Ended;
    }
}

impl<P: Deref<Target = Pipeline>> Iterator for FrameStream<P> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.state == StreamState::Ended {
            return None;
        }
        if self.state == StreamState::Idle {
            log::trace!("stream started");
            self.state = StreamState::Producing;
        }
        loop {
            match self.pipeline.process_next() {
                Ok(Some(ProcessedFrame {
                    chunk: Some(chunk), ..
                })) => {
                    self.yielded += 1;
                    return Some(chunk);
                }
                Ok(Some(_)) => continue,
                Ok(None) => {
                    self.end();
                    return None;
                }
                Err(err) => {
                    log::error!("frame stream stopped: {:#}", err);
                    self.end();
                    return None;
                }
            }
        }
    }
}
