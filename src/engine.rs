//! Two-stage cascade: detector over the full frame, classifier per crop.
//!
//! The engine serves inference from an immutable [`EngineSnapshot`] (models,
//! device, thresholds). `reload` builds a complete replacement snapshot first
//! and swaps it in only when both checkpoints loaded, so a failed reload leaves
//! the previous snapshot in service and an in-flight `infer` always finishes
//! against the snapshot it started with.

use std::sync::{Arc, Mutex, RwLock};

use anyhow::anyhow;
use image::RgbImage;
use thiserror::Error;

use crate::config::{EngineConfig, Thresholds};
use crate::detect::{Classifier, Detection, Detector, ModelRegistry, ModelRole};
use crate::taxonomy::{DefectClass, ObjectClass};

/// Crops narrower or shorter than this never reach the classifier.
pub const MIN_CROP_SIDE: u32 = 10;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load {role} checkpoint '{location}': {reason:#}")]
    ModelLoad {
        role: ModelRole,
        location: String,
        reason: anyhow::Error,
    },
    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),
}

/// Everything one `infer` call needs, captured at a single point in time.
pub struct EngineSnapshot {
    config: EngineConfig,
    thresholds: Thresholds,
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
}

impl EngineSnapshot {
    fn load(config: EngineConfig, registry: &ModelRegistry) -> Result<Self, EngineError> {
        let detector = registry
            .load_detector(&config.detector_ckpt, config.device)
            .map_err(|reason| EngineError::ModelLoad {
                role: ModelRole::Detector,
                location: config.detector_ckpt.clone(),
                reason,
            })?;
        let classifier = registry
            .load_classifier(&config.classifier_ckpt, config.device)
            .map_err(|reason| EngineError::ModelLoad {
                role: ModelRole::Classifier,
                location: config.classifier_ckpt.clone(),
                reason,
            })?;
        Ok(Self::from_parts(config, detector, classifier))
    }

    fn from_parts(
        config: EngineConfig,
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            thresholds: config.thresholds(),
            config,
            detector,
            classifier,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Run the cascade on one frame.
    pub fn infer(&self, image: &RgbImage) -> Result<Vec<Detection>, EngineError> {
        let candidates = self
            .detector
            .detect(image)
            .map_err(EngineError::Inference)?;

        let mut detections = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let object_class = ObjectClass::from_index(candidate.class_index).ok_or_else(|| {
                EngineError::Inference(anyhow!(
                    "detector class index {} outside taxonomy",
                    candidate.class_index
                ))
            })?;

            let Some(bbox) = candidate.pixel_box(image.width(), image.height()) else {
                log::debug!("dropping {} candidate outside the frame", object_class);
                continue;
            };
            if bbox.width() < MIN_CROP_SIDE || bbox.height() < MIN_CROP_SIDE {
                log::debug!(
                    "dropping degenerate {}x{} crop for {}",
                    bbox.width(),
                    bbox.height(),
                    object_class
                );
                continue;
            }

            let crop = image::imageops::crop_imm(
                image,
                bbox.x1 as u32,
                bbox.y1 as u32,
                bbox.width(),
                bbox.height(),
            )
            .to_image();
            let top1 = self
                .classifier
                .classify(&crop)
                .map_err(EngineError::Inference)?;
            let defect_class = DefectClass::from_index(top1.class_index).ok_or_else(|| {
                EngineError::Inference(anyhow!(
                    "classifier class index {} outside taxonomy",
                    top1.class_index
                ))
            })?;

            if !self.thresholds.admits(
                defect_class.condition(),
                candidate.confidence,
                top1.confidence,
            ) {
                continue;
            }

            detections.push(Detection {
                bbox,
                object_class,
                object_confidence: candidate.confidence,
                defect_class,
                defect_confidence: top1.confidence,
            });
        }
        Ok(detections)
    }
}

/// Cascade inference engine with atomically swappable configuration.
pub struct CascadeEngine {
    registry: ModelRegistry,
    active: RwLock<Arc<EngineSnapshot>>,
    reload_lock: Mutex<()>,
}

impl CascadeEngine {
    /// Load both checkpoints named by `config`.
    pub fn new(config: EngineConfig, registry: ModelRegistry) -> Result<Self, EngineError> {
        let snapshot = EngineSnapshot::load(config, &registry)?;
        log::info!(
            "cascade engine ready (defect_threshold={:.2}, good_threshold={:.2})",
            snapshot.thresholds.defect,
            snapshot.thresholds.good
        );
        Ok(Self::from_snapshot(snapshot, registry))
    }

    /// Build an engine around models that are already constructed.
    ///
    /// The checkpoint locations in `config` are only consulted by later
    /// reloads, which resolve them through the default registry.
    pub fn with_models(
        config: EngineConfig,
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self::from_snapshot(
            EngineSnapshot::from_parts(config, detector, classifier),
            ModelRegistry::with_defaults(),
        )
    }

    fn from_snapshot(snapshot: EngineSnapshot, registry: ModelRegistry) -> Self {
        Self {
            registry,
            active: RwLock::new(Arc::new(snapshot)),
            reload_lock: Mutex::new(()),
        }
    }

    /// The snapshot new `infer` calls currently run against.
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        match self.active.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.snapshot().config.clone()
    }

    pub fn thresholds(&self) -> Thresholds {
        self.snapshot().thresholds
    }

    /// Run the cascade on `image` against the current snapshot.
    pub fn infer(&self, image: &RgbImage) -> Result<Vec<Detection>, EngineError> {
        self.snapshot().infer(image)
    }

    /// Replace models, device and thresholds as one unit.
    ///
    /// Both checkpoints are loaded before anything is swapped; on error the
    /// previous snapshot stays active.
    pub fn reload(&self, config: EngineConfig) -> Result<(), EngineError> {
        let _serial = match self.reload_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let snapshot = match EngineSnapshot::load(config, &self.registry) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                log::error!("reload rejected, keeping previous models: {}", e);
                return Err(e);
            }
        };
        log::info!(
            "engine reloaded (detector={}, classifier={}, device={}, defect_threshold={:.2}, good_threshold={:.2})",
            snapshot.config.detector_ckpt,
            snapshot.config.classifier_ckpt,
            snapshot.config.device,
            snapshot.thresholds.defect,
            snapshot.thresholds.good
        );
        match self.active.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
        Ok(())
    }
}
