use std::sync::Arc;

use anyhow::{Context, Result};

use super::{Pipeline, SnapSettings};
use crate::config::HelmetConfig;
use crate::detect::{
    DetectParams, DetectionAdapter, DetectorBackend, ScriptedBackend, PLATE_STAGE_PARAMS,
};
use crate::diagnostics::RejectionLog;
use crate::ingest::{FileConfig, FileSource};
use crate::ocr::{OcrEngine, ScriptedOcr};
use crate::output::{OutputResources, RecordingSettings};
use crate::storage::{PersistenceSink, SqlitePlateStore};

/// Open every collaborator named by the configuration and wire a pipeline.
///
/// Fails when the video cannot be opened, a model or the OCR engine cannot be
/// loaded, the configured database cannot be opened or the snaps directory
/// cannot be created. The plate stage ignores `detector.input_size`.
pub fn open_pipeline(cfg: &HelmetConfig) -> Result<Pipeline> {
    let source = FileSource::open(FileConfig::new(cfg.video_path.clone()))?;

    let rider_backend = load_backend(&cfg.detector.rider_model, cfg.detector.input_size, "riders")?;
    let plate_backend = load_backend(
        &cfg.detector.plate_model,
        PLATE_STAGE_PARAMS.input_size,
        "plates",
    )?;
    let adapter = DetectionAdapter::new(rider_backend, plate_backend)
        .with_rider_params(DetectParams {
            confidence: cfg.detector.rider_confidence,
            input_size: cfg.detector.input_size,
        });
    adapter.warm_up().context("detector warm-up failed")?;

    let ocr = load_ocr(cfg)?;

    std::fs::create_dir_all(&cfg.snaps_dir)
        .with_context(|| format!("create snaps dir {}", cfg.snaps_dir.display()))?;
    if let Some(log_dir) = cfg.rejected_log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("create log dir {}", log_dir.display()))?;
    }

    let sink = match cfg.db_path.as_deref() {
        Some(db_path) => {
            let store = SqlitePlateStore::open(db_path)
                .with_context(|| format!("open plate storage {}", db_path))?;
            log::info!("plate storage: {}", db_path);
            PersistenceSink::new(Box::new(store))
        }
        None => {
            log::warn!("no storage configured; accepted plates will not be persisted");
            PersistenceSink::disabled()
        }
    };

    let outputs = OutputResources::new(RecordingSettings {
        enabled: cfg.recording.enabled,
        path: cfg.recording.path.clone(),
    });

    Ok(Pipeline::new(Box::new(source), adapter, ocr)
        .with_outputs(outputs)
        .with_persistence(sink)
        .with_rejection_log(RejectionLog::new(cfg.rejected_log_path.clone()))
        .with_snaps(SnapSettings {
            dir: cfg.snaps_dir.clone(),
            naming: cfg.snap_naming,
        }))
}

/// `stub://` locators yield a scripted backend that detects nothing.
fn load_backend(
    locator: &str,
    input_size: u32,
    name: &'static str,
) -> Result<Arc<dyn DetectorBackend>> {
    if locator.starts_with("stub://") {
        log::info!("{} detector: scripted ({})", name, locator);
        return Ok(Arc::new(ScriptedBackend::new(name)));
    }
    #[cfg(feature = "backend-tract")]
    {
        let backend = crate::detect::TractBackend::new(locator, input_size)
            .with_context(|| format!("load {} model {}", name, locator))?;
        log::info!("{} detector: {}", name, locator);
        Ok(Arc::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let _ = input_size;
        Err(anyhow::anyhow!(
            "cannot load {} model '{}': ONNX inference requires the backend-tract feature",
            name,
            locator
        ))
    }
}

/// `tessdata = "stub://"` yields a scripted engine that reads nothing. Any
/// other value, including none (the system tessdata), needs Tesseract.
fn load_ocr(cfg: &HelmetConfig) -> Result<Arc<dyn OcrEngine>> {
    if cfg.tessdata.as_deref() == Some("stub://") {
        log::info!("ocr: scripted");
        return Ok(Arc::new(ScriptedOcr::new()));
    }
    #[cfg(feature = "ocr-tesseract")]
    {
        let engine = crate::ocr::TesseractOcr::new(cfg.tessdata.as_deref())
            .context("load tesseract")?;
        Ok(Arc::new(engine))
    }
    #[cfg(not(feature = "ocr-tesseract"))]
    {
        Err(anyhow::anyhow!(
            "cannot load OCR engine (tessdata {:?}): plate reading requires the ocr-tesseract feature",
            cfg.tessdata.as_deref().unwrap_or("system default")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(dir: &std::path::Path) -> HelmetConfig {
        let mut cfg = HelmetConfig::default();
        cfg.video_path = "stub://clip?frames=2&width=64&height=48".into();
        cfg.detector.rider_model = "stub://riders".into();
        cfg.detector.plate_model = "stub://plates".into();
        cfg.snaps_dir = dir.join("Snaps");
        cfg.rejected_log_path = dir.join("logs/rejected.txt");
        cfg.recording.path = dir.join("out/processed.mjpeg");
        cfg.tessdata = Some("stub://".into());
        cfg
    }

    #[test]
    fn stub_locators_build_a_working_pipeline() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = stub_config(dir.path());
        let pipeline = open_pipeline(&cfg)?;
        assert!(cfg.snaps_dir.is_dir());
        assert_eq!(pipeline.frames().count(), 2);
        pipeline.release()?;
        assert!(cfg.recording.path.is_file());
        Ok(())
    }

    #[test]
    fn unopenable_video_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = stub_config(dir.path());
        cfg.video_path = "rtsp://camera/1".into();
        assert!(open_pipeline(&cfg).is_err());
    }

    #[test]
    fn plate_stage_ignores_configured_input_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = stub_config(dir.path());
        cfg.detector.input_size = 320;
        cfg.detector.rider_confidence = 0.5;
        let pipeline = open_pipeline(&cfg)?;
        assert_eq!(pipeline.adapter().plate_params(), PLATE_STAGE_PARAMS);
        assert_eq!(
            pipeline.adapter().rider_params(),
            DetectParams {
                confidence: 0.5,
                input_size: 320
            }
        );
        Ok(())
    }

    #[cfg(not(feature = "ocr-tesseract"))]
    #[test]
    fn tesseract_needs_ocr_feature() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = stub_config(dir.path());
        cfg.tessdata = Some("/usr/share/tessdata".into());
        let err = open_pipeline(&cfg).err().expect("no ocr engine");
        assert!(format!("{:#}", err).contains("ocr-tesseract"));

        cfg.tessdata = None;
        assert!(open_pipeline(&cfg).is_err());
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn model_files_need_inference_feature() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = stub_config(dir.path());
        cfg.detector.rider_model = "Weights/BikeFaceHelmet/best.onnx".into();
        assert!(open_pipeline(&cfg).is_err());
    }
}
