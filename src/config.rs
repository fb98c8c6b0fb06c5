use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::pipeline::SnapNaming;

const DEFAULT_VIDEO_PATH: &str = "Media/test2.mp4";
const DEFAULT_RIDER_MODEL: &str = "Weights/BikeFaceHelmet/best.onnx";
const DEFAULT_PLATE_MODEL: &str = "Weights/NoPlate1/best.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_RIDER_CONFIDENCE: f32 = 0.25;
const DEFAULT_SNAPS_DIR: &str = "Snaps";
const DEFAULT_REJECTED_LOG: &str = "logs/rejected.txt";
const DEFAULT_RECORDING_PATH: &str = "output/processed.mjpeg";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HelmetConfigFile {
    video_path: Option<String>,
    snaps_dir: Option<PathBuf>,
    rejected_log_path: Option<PathBuf>,
    snap_naming: Option<SnapNaming>,
    detector: Option<DetectorConfigFile>,
    recording: Option<RecordingConfigFile>,
    storage: Option<StorageConfigFile>,
    ocr: Option<OcrConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    rider_model: Option<String>,
    plate_model: Option<String>,
    input_size: Option<u32>,
    rider_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RecordingConfigFile {
    enabled: Option<bool>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StorageConfigFile {
    db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OcrConfigFile {
    tessdata: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HelmetConfig {
    /// Local video file or `stub://` locator.
    pub video_path: String,
    pub detector: DetectorSettings,
    pub snaps_dir: PathBuf,
    pub snap_naming: SnapNaming,
    pub rejected_log_path: PathBuf,
    pub recording: RecordingConfig,
    /// SQLite path or `file:` URI. `None` runs without persistence.
    pub db_path: Option<String>,
    /// Tesseract data directory override.
    pub tessdata: Option<String>,
    pub api_addr: String,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// ONNX model path, or `stub://` for a scripted backend.
    pub rider_model: String,
    pub plate_model: String,
    pub input_size: u32,
    pub rider_confidence: f32,
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for HelmetConfig {
    fn default() -> Self {
        Self::from_file(HelmetConfigFile::default())
    }
}

impl HelmetConfig {
    /// Load from `HELMET_CONFIG` (if set), apply environment overrides and
    /// validate.
    pub fn load() -> Result<Self> {
        let config_path = env_non_empty("HELMET_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`HelmetConfig::load`] with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: HelmetConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();
        let recording = file.recording.unwrap_or_default();
        Self {
            video_path: file
                .video_path
                .unwrap_or_else(|| DEFAULT_VIDEO_PATH.to_string()),
            detector: DetectorSettings {
                rider_model: detector
                    .rider_model
                    .unwrap_or_else(|| DEFAULT_RIDER_MODEL.to_string()),
                plate_model: detector
                    .plate_model
                    .unwrap_or_else(|| DEFAULT_PLATE_MODEL.to_string()),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                rider_confidence: detector
                    .rider_confidence
                    .unwrap_or(DEFAULT_RIDER_CONFIDENCE),
            },
            snaps_dir: file
                .snaps_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPS_DIR)),
            snap_naming: file.snap_naming.unwrap_or_default(),
            rejected_log_path: file
                .rejected_log_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REJECTED_LOG)),
            recording: RecordingConfig {
                enabled: recording.enabled.unwrap_or(true),
                path: recording
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDING_PATH)),
            },
            db_path: file.storage.and_then(|storage| storage.db_path),
            tessdata: file.ocr.and_then(|ocr| ocr.tessdata),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_non_empty("HELMET_VIDEO_PATH") {
            self.video_path = path;
        }
        if let Some(model) = env_non_empty("HELMET_RIDER_MODEL") {
            self.detector.rider_model = model;
        }
        if let Some(model) = env_non_empty("HELMET_PLATE_MODEL") {
            self.detector.plate_model = model;
        }
        if let Some(dir) = env_non_empty("HELMET_SNAPS_DIR") {
            self.snaps_dir = PathBuf::from(dir);
        }
        if let Some(flag) = env_non_empty("HELMET_SAVE_VIDEO") {
            self.recording.enabled = parse_bool(&flag)
                .ok_or_else(|| anyhow!("HELMET_SAVE_VIDEO must be one of 0, 1, true, false"))?;
        }
        if let Some(path) = env_non_empty("HELMET_OUT_VIDEO") {
            self.recording.path = PathBuf::from(path);
        }
        if let Some(db_path) = env_non_empty("HELMET_DB_PATH") {
            self.db_path = Some(db_path);
        }
        if let Some(tessdata) = env_non_empty("HELMET_TESSDATA") {
            self.tessdata = Some(tessdata);
        }
        if let Some(addr) = env_non_empty("HELMET_API_ADDR") {
            self.api_addr = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.video_path.trim().is_empty() {
            return Err(anyhow!("video_path must not be empty"));
        }
        let confidence = self.detector.rider_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!(
                "detector.rider_confidence must be within [0, 1], got {}",
                confidence
            ));
        }
        let size = self.detector.input_size;
        if size == 0 || size % 32 != 0 {
            return Err(anyhow!(
                "detector.input_size must be a positive multiple of 32, got {}",
                size
            ));
        }
        if self.recording.enabled && self.recording.path.as_os_str().is_empty() {
            return Err(anyhow!("recording.path must be set when recording is enabled"));
        }
        if let Some(db_path) = &self.db_path {
            if db_path.trim().is_empty() {
                return Err(anyhow!("storage.db_path must not be empty"));
            }
        }
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("api.addr '{}' is not a socket address: {}", self.api_addr, e))?;
        Ok(())
    }
}

/// TOML by default; `.json` files are read as JSON.
fn read_config_file(path: &Path) -> Result<HelmetConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = HelmetConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.video_path, DEFAULT_VIDEO_PATH);
        assert!(cfg.recording.enabled);
        assert!(cfg.db_path.is_none());
        assert_eq!(cfg.snap_naming, SnapNaming::PerViolation);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = HelmetConfig::default();
        cfg.detector.rider_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = HelmetConfig::default();
        cfg.detector.input_size = 650;
        assert!(cfg.validate().is_err());

        let mut cfg = HelmetConfig::default();
        cfg.api_addr = "localhost".into();
        assert!(cfg.validate().is_err());

        let mut cfg = HelmetConfig::default();
        cfg.video_path = " ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_toml_sections() {
        let file: HelmetConfigFile = toml::from_str(
            r#"
            video_path = "stub://clip"
            snap_naming = "per_frame"

            [detector]
            rider_model = "stub://riders"
            input_size = 320

            [storage]
            db_path = "plates.db"
            "#,
        )
        .unwrap();
        let cfg = HelmetConfig::from_file(file);
        assert_eq!(cfg.video_path, "stub://clip");
        assert_eq!(cfg.snap_naming, SnapNaming::PerFrame);
        assert_eq!(cfg.detector.rider_model, "stub://riders");
        assert_eq!(cfg.detector.plate_model, DEFAULT_PLATE_MODEL);
        assert_eq!(cfg.detector.input_size, 320);
        assert_eq!(cfg.db_path.as_deref(), Some("plates.db"));
    }

    #[test]
    fn unknown_storage_keys_are_rejected() {
        let parsed: Result<HelmetConfigFile, _> = toml::from_str(
            r#"
            [storage]
            host = "localhost"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
