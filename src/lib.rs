//! Helmet Watch
//!
//! Inspects a video stream frame by frame for motorcycle riders without a
//! helmet, reads and validates their licence plates, persists confirmed
//! violations, and republishes the annotated video as an MJPEG feed.
//!
//! # Frame flow
//!
//! 1. **Read**: one frame from the capture device, under the capture lock.
//! 2. **Detect**: faces, helmets and riders on the whole frame.
//! 3. **Associate**: a rider containing a face and no helmet is a violation.
//! 4. **Extract**: plates are detected on the rider crop, read by OCR and
//!    validated against the supported plate grammars.
//! 5. **Output**: the annotated frame is recorded (lazily opened writer) and
//!    encoded as one multipart chunk for streaming.
//!
//! # Module Structure
//!
//! - `geometry`, `association`, `plate`: pure per-frame logic
//! - `detect`, `ocr`: seams to the external recognition models
//! - `ingest`, `frame`, `annotate`, `output`: pixels in and out
//! - `storage`, `diagnostics`: plate records and the rejected-read log
//! - `pipeline`: the frame production loop
//! - `config`, `api`: daemon configuration and HTTP surface

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};

pub mod annotate;
pub mod api;
pub mod association;
pub mod config;
pub mod detect;
pub mod diagnostics;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod ocr;
pub mod output;
pub mod pipeline;
pub mod plate;
pub mod storage;

pub use association::find_violations;
pub use config::HelmetConfig;
pub use detect::{
    Detection, DetectionAdapter, DetectorBackend, ObjectClass, RawDetection, ScriptedBackend,
};
pub use frame::{Frame, MJPEG_BOUNDARY};
pub use geometry::{contains, BoundingBox};
pub use ingest::{CaptureDevice, FileConfig, FileSource, MemorySource};
pub use ocr::{OcrEngine, ScriptedOcr};
pub use output::{OutputResources, RecordingSettings};
pub use pipeline::{open_pipeline, FrameReport, FrameStream, Pipeline, SnapNaming, SnapSettings};
pub use plate::{validate, PlateGrammar, ValidatedPlate};
pub use storage::{
    InMemoryPlateStore, PersistenceSink, PlateRecord, PlateStats, PlateStore, SqlitePlateStore,
};

/// A private SQLite in-memory database URI. Every connection opened on the
/// same URI shares the database while at least one stays open.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:helmet_watch_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}
