use anyhow::Result;
use image::RgbImage;
use std::fmt;

use crate::detect::result::{Classification, RawDetection};

/// Which stage of the cascade a model serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelRole {
    Detector,
    Classifier,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRole::Detector => f.write_str("detector"),
            ModelRole::Classifier => f.write_str("classifier"),
        }
    }
}

/// First cascade stage: boxes, scores and classes for a full frame.
///
/// Models are shared between the worker thread and any thread that holds an
/// engine snapshot, so `detect` takes `&self`. Implementations must treat the
/// image as read-only and must not retain it past the call.
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a full frame.
    ///
    /// Boxes are in frame pixel coordinates. The returned order is the order
    /// the cascade preserves.
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Second cascade stage: top-1 condition class for a crop.
pub trait Classifier: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn classify(&self, crop: &RgbImage) -> Result<Classification>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
