use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use helmet_watch::diagnostics::RejectionLog;
use helmet_watch::{
    shared_memory_uri, BoundingBox, DetectionAdapter, MemorySource, PersistenceSink, Pipeline,
    PlateStore, RawDetection, ScriptedBackend, ScriptedOcr, SnapNaming, SnapSettings,
    SqlitePlateStore,
};

const FACE: usize = 0;
const HELMET: usize = 1;
const RIDER: usize = 2;

fn frames(n: usize) -> Vec<RgbImage> {
    vec![RgbImage::new(320, 240); n]
}

fn quiet_adapter() -> DetectionAdapter {
    DetectionAdapter::new(
        Arc::new(ScriptedBackend::new("riders")),
        Arc::new(ScriptedBackend::new("plates")),
    )
}

#[test]
fn unhelmeted_rider_plate_is_persisted_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_uri = shared_memory_uri();
    // keeps the shared in-memory database alive and serves the reads
    let mut reader = SqlitePlateStore::open(&db_uri)?;

    let riders = Arc::new(ScriptedBackend::new("riders"));
    let plates = Arc::new(ScriptedBackend::new("plates"));
    let ocr = Arc::new(ScriptedOcr::new());
    riders.push(vec![
        RawDetection::new(RIDER, [0.0, 0.0, 100.0, 200.0], 0.91),
        RawDetection::new(FACE, [10.0, 10.0, 40.0, 40.0], 0.88),
    ]);
    plates.push(vec![RawDetection::new(0, [5.0, 150.0, 45.0, 170.0], 0.64)]);
    ocr.push("wp 1234");

    let rejected_log = dir.path().join("logs").join("rejected.txt");
    let pipeline = Pipeline::new(
        Box::new(MemorySource::new(frames(1), 30.0)),
        DetectionAdapter::new(riders, plates.clone()),
        ocr,
    )
    .with_persistence(PersistenceSink::new(Box::new(SqlitePlateStore::open(
        &db_uri,
    )?)))
    .with_rejection_log(RejectionLog::new(&rejected_log))
    .with_snaps(SnapSettings {
        dir: dir.path().to_path_buf(),
        naming: SnapNaming::PerViolation,
    });

    let processed = pipeline.process_next()?.expect("one frame");
    assert_eq!(processed.index, 1);
    assert!(processed.chunk.is_some());

    let plate_box = BoundingBox::new(5, 150, 45, 170);
    let plate_annotations: Vec<_> = processed
        .report
        .annotations
        .iter()
        .filter(|a| a.label == "WP1234")
        .collect();
    assert_eq!(plate_annotations.len(), 1);
    assert_eq!(plate_annotations[0].bbox, plate_box);

    let rows = reader.latest(10, None)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].frame_number, 1);
    assert_eq!(rows[0].plate_text, "WP1234");
    assert!(rows[0].plate_image_path.ends_with("plate_1.jpg"));
    assert!(std::path::Path::new(&rows[0].plate_image_path).is_file());

    let params = plates.last_params().expect("plate stage ran");
    assert_eq!(params.confidence, 0.2);
    assert_eq!(params.input_size, 640);
    assert!(!rejected_log.exists());

    assert!(pipeline.process_next()?.is_none());
    pipeline.release()?;
    Ok(())
}

#[test]
fn helmet_inside_rider_suppresses_violation() -> Result<()> {
    let riders = Arc::new(ScriptedBackend::new("riders"));
    let plates = Arc::new(ScriptedBackend::new("plates"));
    riders.push(vec![
        RawDetection::new(RIDER, [0.0, 0.0, 100.0, 200.0], 0.9),
        RawDetection::new(FACE, [10.0, 10.0, 40.0, 40.0], 0.9),
        RawDetection::new(HELMET, [5.0, 0.0, 50.0, 45.0], 0.9),
    ]);
    let pipeline = Pipeline::new(
        Box::new(MemorySource::new(frames(1), 0.0)),
        DetectionAdapter::new(riders, plates.clone()),
        Arc::new(ScriptedOcr::new()),
    );
    let processed = pipeline.process_next()?.expect("one frame");
    assert!(processed.report.violations.is_empty());
    assert_eq!(processed.report.annotations.len(), 3);
    assert!(plates.last_params().is_none());
    Ok(())
}

#[test]
fn frame_indices_are_contiguous_regardless_of_findings() -> Result<()> {
    let riders = Arc::new(ScriptedBackend::new("riders"));
    let plates = Arc::new(ScriptedBackend::new("plates"));
    let ocr = Arc::new(ScriptedOcr::new().with_fallback("nonsense"));
    riders.push(Vec::new());
    riders.push(vec![
        RawDetection::new(RIDER, [0.0, 0.0, 100.0, 200.0], 0.9),
        RawDetection::new(FACE, [10.0, 10.0, 40.0, 40.0], 0.9),
    ]);
    plates.push(vec![
        RawDetection::new(0, [5.0, 150.0, 45.0, 170.0], 0.6),
        RawDetection::new(0, [50.0, 150.0, 90.0, 170.0], 0.6),
    ]);
    let pipeline = Pipeline::new(
        Box::new(MemorySource::new(frames(5), 0.0)),
        DetectionAdapter::new(riders, plates),
        ocr,
    );
    let mut indices = Vec::new();
    while let Some(processed) = pipeline.process_next()? {
        indices.push(processed.index);
    }
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    assert_eq!(pipeline.frames_read(), 5);
    Ok(())
}

#[test]
fn concurrent_callers_never_share_a_frame() {
    const TOTAL: usize = 60;
    let pipeline = Arc::new(Pipeline::new(
        Box::new(MemorySource::new(vec![RgbImage::new(32, 24); TOTAL], 25.0)),
        quiet_adapter(),
        Arc::new(ScriptedOcr::new()),
    ));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let pipeline = pipeline.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                while let Ok(Some(processed)) = pipeline.process_next() {
                    seen.push(processed.index);
                }
                seen
            })
        })
        .collect();

    let mut all = HashSet::new();
    let mut count = 0;
    for worker in workers {
        let seen = worker.join().expect("worker");
        // each caller sees its own frames in read order
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        count += seen.len();
        all.extend(seen);
    }
    assert_eq!(count, TOTAL);
    assert_eq!(all, (1..=TOTAL as u64).collect::<HashSet<_>>());
}

#[test]
fn interleaved_streams_split_the_source() {
    let pipeline = Arc::new(Pipeline::new(
        Box::new(MemorySource::new(vec![RgbImage::new(16, 16); 10], 25.0)),
        quiet_adapter(),
        Arc::new(ScriptedOcr::new()),
    ));
    let mut a = pipeline.stream();
    let mut b = pipeline.stream();
    let mut total = 0;
    loop {
        let got_a = a.next().is_some();
        let got_b = b.next().is_some();
        total += got_a as usize + got_b as usize;
        if !got_a && !got_b {
            break;
        }
    }
    assert_eq!(total, 10);
    assert!(a.is_ended() && b.is_ended());
}

#[test]
fn release_is_idempotent() -> Result<()> {
    let pipeline = Pipeline::new(
        Box::new(MemorySource::new(frames(2), 0.0)),
        quiet_adapter(),
        Arc::new(ScriptedOcr::new()),
    );
    pipeline.release()?;
    pipeline.release()?;
    assert!(pipeline.process_next()?.is_none());
    Ok(())
}
