use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tempfile::{tempdir, NamedTempFile};

use powerline_inspect::config::{
    DEFAULT_CLASSIFIER_CKPT, DEFAULT_DEFECT_THRESHOLD, DEFAULT_DETECTOR_CKPT,
    DEFAULT_GOOD_THRESHOLD,
};
use powerline_inspect::{ConfigWatcher, Device, EngineConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "INSPECT_DEVICE",
        "INSPECT_DEFECT_THRESHOLD",
        "INSPECT_GOOD_THRESHOLD",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn missing_file_yields_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().unwrap();
    let cfg = EngineConfig::load(&dir.path().join("config.json")).expect("load config");

    assert_eq!(cfg, EngineConfig::default());
    assert_eq!(cfg.detector_ckpt, DEFAULT_DETECTOR_CKPT);
    assert_eq!(cfg.classifier_ckpt, DEFAULT_CLASSIFIER_CKPT);
    assert_eq!(cfg.device, Device::Cuda(0));
    assert_eq!(cfg.defect_threshold, DEFAULT_DEFECT_THRESHOLD);
    assert_eq!(cfg.good_threshold, DEFAULT_GOOD_THRESHOLD);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "detector_ckpt": "models/detector.onnx",
            "classifier_ckpt": "models/classifier.onnx",
            "device": "cuda:1",
            "defect_threshold": 0.8,
            "good_threshold": 0.4
        }"#,
    );
    std::env::set_var("INSPECT_DEVICE", "cpu");
    std::env::set_var("INSPECT_GOOD_THRESHOLD", "0.55");

    let cfg = EngineConfig::load(file.path()).expect("load config");

    assert_eq!(cfg.detector_ckpt, "models/detector.onnx");
    assert_eq!(cfg.classifier_ckpt, "models/classifier.onnx");
    assert_eq!(cfg.device, Device::Cpu);
    assert_eq!(cfg.defect_threshold, 0.8);
    assert_eq!(cfg.good_threshold, 0.55);

    clear_env();
}

#[test]
fn invalid_env_override_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("{}");
    std::env::set_var("INSPECT_DEFECT_THRESHOLD", "1.7");
    let err = EngineConfig::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("INSPECT_DEFECT_THRESHOLD"));

    clear_env();
    std::env::set_var("INSPECT_DEVICE", "tpu");
    assert!(EngineConfig::load(file.path()).is_err());

    clear_env();
}

#[test]
fn malformed_file_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("{ \"device\": \"cpu\", ");
    let cfg = EngineConfig::load(file.path()).expect("load config");
    assert_eq!(cfg, EngineConfig::default());
}

#[test]
fn rejected_keys_keep_their_defaults_only() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "detector_ckpt": "",
            "device": "cpu",
            "defect_threshold": -0.2,
            "good_threshold": "0.65",
            "window_geometry": [0, 0, 800, 600]
        }"#,
    );
    let cfg = EngineConfig::load(file.path()).expect("load config");

    assert_eq!(cfg.detector_ckpt, DEFAULT_DETECTOR_CKPT);
    assert_eq!(cfg.device, Device::Cpu);
    assert_eq!(cfg.defect_threshold, DEFAULT_DEFECT_THRESHOLD);
    assert_eq!(cfg.good_threshold, 0.65);
}

#[test]
fn saved_config_loads_back() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    let cfg = EngineConfig {
        detector_ckpt: "stub://detector".to_string(),
        classifier_ckpt: "weights/cls.onnx".to_string(),
        device: Device::Cuda(2),
        defect_threshold: 0.75,
        good_threshold: 0.25,
    };
    cfg.save(&path).expect("save config");

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["device"], "cuda:2");
    assert_eq!(EngineConfig::load(&path).expect("load config"), cfg);
}

fn touch(path: &std::path::Path, ahead: Duration) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + ahead)
        .unwrap();
}

#[test]
fn watcher_reports_edits_once() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "device": "cpu", "defect_threshold": 0.7 }"#);
    let mut watcher = ConfigWatcher::new(file.path());
    assert!(watcher.poll().unwrap().is_none());

    std::fs::write(file.path(), r#"{ "device": "cpu", "defect_threshold": 0.85 }"#).unwrap();
    touch(file.path(), Duration::from_secs(5));
    let updated = watcher.poll().unwrap().expect("edit detected");
    assert_eq!(updated.defect_threshold, 0.85);
    assert_eq!(updated.device, Device::Cpu);
    assert!(watcher.poll().unwrap().is_none());
}

#[test]
fn watcher_surfaces_invalid_overrides_and_ignores_missing_files() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("{}");
    let mut watcher = ConfigWatcher::new(file.path());
    std::env::set_var("INSPECT_GOOD_THRESHOLD", "2");
    touch(file.path(), Duration::from_secs(5));
    assert!(watcher.poll().is_err());
    clear_env();

    let dir = tempdir().unwrap();
    let mut missing = ConfigWatcher::new(dir.path().join("config.json"));
    assert!(missing.poll().unwrap().is_none());
}
