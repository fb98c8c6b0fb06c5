use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use helmet_watch::config::HelmetConfig;
use helmet_watch::SnapNaming;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "HELMET_CONFIG",
        "HELMET_VIDEO_PATH",
        "HELMET_RIDER_MODEL",
        "HELMET_PLATE_MODEL",
        "HELMET_SNAPS_DIR",
        "HELMET_SAVE_VIDEO",
        "HELMET_OUT_VIDEO",
        "HELMET_DB_PATH",
        "HELMET_TESSDATA",
        "HELMET_API_ADDR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = HelmetConfig::load().expect("load defaults");
    assert_eq!(cfg.video_path, "Media/test2.mp4");
    assert_eq!(cfg.detector.rider_model, "Weights/BikeFaceHelmet/best.onnx");
    assert_eq!(cfg.detector.plate_model, "Weights/NoPlate1/best.onnx");
    assert_eq!(cfg.detector.input_size, 640);
    assert_eq!(cfg.snaps_dir, PathBuf::from("Snaps"));
    assert_eq!(cfg.rejected_log_path, PathBuf::from("logs/rejected.txt"));
    assert!(cfg.recording.enabled);
    assert_eq!(cfg.db_path, None);
    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
}

#[test]
fn loads_toml_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        video_path = "Media/junction.mp4"
        snaps_dir = "/var/lib/helmet/snaps"
        snap_naming = "per_frame"

        [detector]
        rider_model = "models/riders.onnx"
        rider_confidence = 0.4
        input_size = 416

        [recording]
        enabled = true
        path = "out/junction.mjpeg"

        [storage]
        db_path = "plates.db"

        [api]
        addr = "0.0.0.0:8080"
    "#;
    file.write_all(toml.as_bytes()).expect("write config");

    std::env::set_var("HELMET_CONFIG", file.path());
    std::env::set_var("HELMET_VIDEO_PATH", "stub://clip?frames=10");
    std::env::set_var("HELMET_SAVE_VIDEO", "false");
    std::env::set_var("HELMET_DB_PATH", "override.db");

    let cfg = HelmetConfig::load().expect("load config");
    assert_eq!(cfg.video_path, "stub://clip?frames=10");
    assert_eq!(cfg.snaps_dir, PathBuf::from("/var/lib/helmet/snaps"));
    assert_eq!(cfg.snap_naming, SnapNaming::PerFrame);
    assert_eq!(cfg.detector.rider_model, "models/riders.onnx");
    assert_eq!(cfg.detector.rider_confidence, 0.4);
    assert_eq!(cfg.detector.input_size, 416);
    assert!(!cfg.recording.enabled);
    assert_eq!(cfg.recording.path, PathBuf::from("out/junction.mjpeg"));
    assert_eq!(cfg.db_path.as_deref(), Some("override.db"));
    assert_eq!(cfg.api_addr, "0.0.0.0:8080");

    clear_env();
}

#[test]
fn json_config_files_are_accepted() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new().suffix(".json").tempfile().expect("temp config");
    file.write_all(br#"{"video_path": "stub://clip", "ocr": {"tessdata": "/usr/share/tessdata"}}"#)
        .expect("write config");

    let cfg = HelmetConfig::load_from(Some(file.path())).expect("load json config");
    assert_eq!(cfg.video_path, "stub://clip");
    assert_eq!(cfg.tessdata.as_deref(), Some("/usr/share/tessdata"));
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().expect("temp config");
    file.write_all(b"[detector]\nrider_confidence = 2.0\n")
        .expect("write config");
    assert!(HelmetConfig::load_from(Some(file.path())).is_err());

    std::env::set_var("HELMET_SAVE_VIDEO", "sometimes");
    assert!(HelmetConfig::load().is_err());
    clear_env();

    std::env::set_var("HELMET_API_ADDR", "not-an-addr");
    assert!(HelmetConfig::load().is_err());
    clear_env();
}

#[test]
fn unknown_keys_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().expect("temp config");
    file.write_all(b"[storage]\ndb_path = \"x.db\"\npassword = \"hunter2\"\n")
        .expect("write config");
    assert!(HelmetConfig::load_from(Some(file.path())).is_err());

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().expect("temp config");
    file.write_all(b"[detector]\nplate_confidence = 0.5\n")
        .expect("write config");
    assert!(HelmetConfig::load_from(Some(file.path())).is_err());
}
