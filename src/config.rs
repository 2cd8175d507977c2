use anyhow::{anyhow, Context, Result};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use crate::taxonomy::Condition;

pub const DEFAULT_DETECTOR_CKPT: &str = "checkpoints/detector/weights/best.onnx";
pub const DEFAULT_CLASSIFIER_CKPT: &str = "checkpoints/classifier/weights/best.onnx";
pub const DEFAULT_DEVICE: &str = "cuda";
pub const DEFAULT_DEFECT_THRESHOLD: f32 = 0.7;
pub const DEFAULT_GOOD_THRESHOLD: f32 = 0.5;

const KEY_DETECTOR_CKPT: &str = "detector_ckpt";
const KEY_CLASSIFIER_CKPT: &str = "classifier_ckpt";
const KEY_DEVICE: &str = "device";
const KEY_DEFECT_THRESHOLD: &str = "defect_threshold";
const KEY_GOOD_THRESHOLD: &str = "good_threshold";

/// Compute target for model execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(u32),
}

impl Device {
    pub fn is_gpu(self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::Cuda(0)
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    /// Accepts `cpu`, `cuda`, `cuda:N` and a bare GPU ordinal `N`.
    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim().to_ascii_lowercase();
        if value == "cpu" {
            return Ok(Device::Cpu);
        }
        if value == "cuda" {
            return Ok(Device::Cuda(0));
        }
        let ordinal = value.strip_prefix("cuda:").unwrap_or(&value);
        ordinal
            .parse::<u32>()
            .map(Device::Cuda)
            .map_err(|_| anyhow!("unknown device selector '{}'", value))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(0) => f.write_str("cuda"),
            Device::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The pair of confidence cutoffs applied by the cascade.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub defect: f32,
    pub good: f32,
}

impl Thresholds {
    pub fn for_condition(&self, condition: Condition) -> f32 {
        match condition {
            Condition::Nominal => self.good,
            Condition::Defect => self.defect,
        }
    }

    /// Both confidences must reach the threshold selected by `condition`.
    pub fn admits(&self, condition: Condition, object_conf: f32, defect_conf: f32) -> bool {
        let threshold = self.for_condition(condition);
        object_conf >= threshold && defect_conf >= threshold
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            defect: DEFAULT_DEFECT_THRESHOLD,
            good: DEFAULT_GOOD_THRESHOLD,
        }
    }
}

/// Engine configuration, persisted as a flat JSON key-value map.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineConfig {
    pub detector_ckpt: String,
    pub classifier_ckpt: String,
    pub device: Device,
    pub defect_threshold: f32,
    pub good_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detector_ckpt: DEFAULT_DETECTOR_CKPT.to_string(),
            classifier_ckpt: DEFAULT_CLASSIFIER_CKPT.to_string(),
            device: Device::default(),
            defect_threshold: DEFAULT_DEFECT_THRESHOLD,
            good_threshold: DEFAULT_GOOD_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Load from `path`, then apply environment overrides and validate.
    ///
    /// A missing or malformed file never fails the load: defaults are kept for
    /// whatever could not be read. Invalid environment overrides do fail.
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(path);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read the config file with per-key fallback to defaults.
    pub fn from_file(path: &Path) -> Self {
        if !path.exists() {
            log::info!(
                "config file {} not found, using defaults",
                path.display()
            );
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json_str(&raw, &path.display().to_string()),
            Err(e) => {
                log::warn!("failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse a flat JSON map. `origin` only labels log messages.
    pub fn from_json_str(raw: &str, origin: &str) -> Self {
        let mut cfg = Self::default();
        let map: Map<String, Value> = match serde_json::from_str(raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                log::warn!(
                    "config {} is not a key-value map (found {}), using defaults",
                    origin,
                    json_kind(&other)
                );
                return cfg;
            }
            Err(e) => {
                log::warn!("invalid config {}: {}; using defaults", origin, e);
                return cfg;
            }
        };

        for (key, value) in &map {
            let applied = match key.as_str() {
                KEY_DETECTOR_CKPT => parse_location(value).map(|v| cfg.detector_ckpt = v),
                KEY_CLASSIFIER_CKPT => parse_location(value).map(|v| cfg.classifier_ckpt = v),
                KEY_DEVICE => parse_device(value).map(|v| cfg.device = v),
                KEY_DEFECT_THRESHOLD => parse_threshold(value).map(|v| cfg.defect_threshold = v),
                KEY_GOOD_THRESHOLD => parse_threshold(value).map(|v| cfg.good_threshold = v),
                _ => {
                    log::debug!("config {}: ignoring unknown key '{}'", origin, key);
                    Ok(())
                }
            };
            if let Err(e) = applied {
                log::warn!(
                    "config {}: key '{}' rejected ({}); keeping default",
                    origin,
                    key,
                    e
                );
            }
        }
        cfg
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("INSPECT_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device
                    .parse()
                    .map_err(|e| anyhow!("INSPECT_DEVICE: {}", e))?;
            }
        }
        if let Ok(value) = std::env::var("INSPECT_DEFECT_THRESHOLD") {
            self.defect_threshold = parse_threshold_str(&value)
                .map_err(|e| anyhow!("INSPECT_DEFECT_THRESHOLD: {}", e))?;
        }
        if let Ok(value) = std::env::var("INSPECT_GOOD_THRESHOLD") {
            self.good_threshold = parse_threshold_str(&value)
                .map_err(|e| anyhow!("INSPECT_GOOD_THRESHOLD: {}", e))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.detector_ckpt.trim().is_empty() {
            return Err(anyhow!("detector_ckpt must not be empty"));
        }
        if self.classifier_ckpt.trim().is_empty() {
            return Err(anyhow!("classifier_ckpt must not be empty"));
        }
        for (key, value) in [
            (KEY_DEFECT_THRESHOLD, self.defect_threshold),
            (KEY_GOOD_THRESHOLD, self.good_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", key, value));
            }
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            defect: self.defect_threshold,
            good: self.good_threshold,
        }
    }

    /// Write the flat key-value map back to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }
}

/// Re-reads a config file after its modification time moves forward.
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Start watching `path`; its current state counts as already seen.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified_at(&path);
        Self {
            path,
            last_modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(Some(config))` when the file changed since the last poll. A file
    /// that disappears keeps the last seen state.
    pub fn poll(&mut self) -> Result<Option<EngineConfig>> {
        let Some(modified) = modified_at(&self.path) else {
            return Ok(None);
        };
        if self.last_modified.is_some_and(|seen| modified <= seen) {
            return Ok(None);
        }
        self.last_modified = Some(modified);
        EngineConfig::load(&self.path).map(Some)
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn parse_location(value: &Value) -> Result<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        Value::String(_) => Err(anyhow!("empty model location")),
        other => Err(anyhow!("expected a string, found {}", json_kind(other))),
    }
}

fn parse_device(value: &Value) -> Result<Device> {
    match value {
        Value::String(s) => s.parse(),
        Value::Number(n) => n.to_string().parse(),
        other => Err(anyhow!("expected a device selector, found {}", json_kind(other))),
    }
}

fn parse_threshold(value: &Value) -> Result<f32> {
    match value {
        Value::Number(n) => {
            let v = n
                .as_f64()
                .ok_or_else(|| anyhow!("threshold is not representable as a float"))?;
            check_unit_interval(v as f32)
        }
        Value::String(s) => parse_threshold_str(s),
        other => Err(anyhow!("expected a number, found {}", json_kind(other))),
    }
}

fn parse_threshold_str(value: &str) -> Result<f32> {
    let v: f32 = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("'{}' is not a number", value))?;
    check_unit_interval(v)
}

fn check_unit_interval(value: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(anyhow!("{} is outside [0, 1]", value))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_selectors() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda(0));
        assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::Cuda(1));
        assert_eq!("2".parse::<Device>().unwrap(), Device::Cuda(2));
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::Cuda(0).to_string(), "cuda");
        assert_eq!(Device::Cuda(3).to_string(), "cuda:3");
    }

    #[test]
    fn bad_keys_fall_back_individually() {
        let cfg = EngineConfig::from_json_str(
            r#"{
                "detector_ckpt": "models/det.onnx",
                "classifier_ckpt": 42,
                "device": "cpu",
                "defect_threshold": "not-a-number",
                "good_threshold": 0.35,
                "theme": "dark"
            }"#,
            "test",
        );
        assert_eq!(cfg.detector_ckpt, "models/det.onnx");
        assert_eq!(cfg.classifier_ckpt, DEFAULT_CLASSIFIER_CKPT);
        assert_eq!(cfg.device, Device::Cpu);
        assert_eq!(cfg.defect_threshold, DEFAULT_DEFECT_THRESHOLD);
        assert_eq!(cfg.good_threshold, 0.35);
    }

    #[test]
    fn malformed_json_keeps_defaults() {
        assert_eq!(
            EngineConfig::from_json_str("{ not json", "test"),
            EngineConfig::default()
        );
        assert_eq!(
            EngineConfig::from_json_str("[1, 2]", "test"),
            EngineConfig::default()
        );
    }

    #[test]
    fn thresholds_outside_unit_interval_are_rejected() {
        let cfg = EngineConfig::from_json_str(r#"{"good_threshold": 1.5}"#, "test");
        assert_eq!(cfg.good_threshold, DEFAULT_GOOD_THRESHOLD);
    }

    #[test]
    fn threshold_selection_follows_condition() {
        let t = Thresholds {
            defect: 0.7,
            good: 0.5,
        };
        assert!(t.admits(Condition::Nominal, 0.8, 0.6));
        assert!(!t.admits(Condition::Defect, 0.8, 0.6));
        assert!(!t.admits(Condition::Nominal, 0.49, 0.9));
        assert!(t.admits(Condition::Defect, 0.7, 0.7));
    }

    #[test]
    fn saved_config_uses_flat_keys() {
        let json = serde_json::to_value(EngineConfig::default()).unwrap();
        let keys: Vec<&str> = json
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys.len(), 5);
        for key in [
            KEY_DETECTOR_CKPT,
            KEY_CLASSIFIER_CKPT,
            KEY_DEVICE,
            KEY_DEFECT_THRESHOLD,
            KEY_GOOD_THRESHOLD,
        ] {
            assert!(keys.contains(&key), "{key}");
        }
        assert_eq!(json["device"], "cuda");
    }
}
