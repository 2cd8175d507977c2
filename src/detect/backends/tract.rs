#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::config::Device;
use crate::detect::backend::{Classifier, Detector};
use crate::detect::registry::ModelLoader;
use crate::detect::result::{Classification, RawDetection};
use crate::detect::yolo;
use crate::taxonomy::{CLASSIFIER_CLASSES, DETECTOR_CLASSES};

pub const DEFAULT_DETECTOR_INPUT: u32 = 640;
pub const DEFAULT_CLASSIFIER_INPUT: u32 = 224;

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Load an ONNX model from disk with a fixed `1x3xSxS` input.
fn load_plan(model_path: &Path, size: u32) -> Result<OnnxPlan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size as usize, size as usize)),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn ensure_not_empty(image: &RgbImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("cannot run a model on an empty image"));
    }
    Ok(())
}

/// Lay out a square input as NCHW floats in [0, 1].
fn to_tensor(square: &RgbImage) -> Tensor {
    let size = square.width() as usize;
    tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
        square.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
    })
    .into_tensor()
}

fn warn_if_gpu(device: Device) {
    if device.is_gpu() {
        log::warn!(
            "tract backend executes on CPU; device selector '{}' is ignored",
            device
        );
    }
}

/// Tract-based ONNX detector for YOLO-style heads.
///
/// Loads a local model file; no network I/O, nothing written to disk.
pub struct TractDetector {
    model: OnnxPlan,
    input_size: u32,
}

impl TractDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        Ok(Self {
            model: load_plan(model_path.as_ref(), input_size)?,
            input_size,
        })
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        ensure_not_empty(image)?;
        let (input, placement) = yolo::letterbox(image, self.input_size);
        let outputs = self
            .model
            .run(tvec!(to_tensor(&input).into()))
            .context("ONNX detector inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("detector produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("detector output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();

        let candidates = yolo::decode(
            &data,
            &shape,
            DETECTOR_CLASSES.len(),
            &placement,
            yolo::CANDIDATE_FLOOR,
        )?;
        Ok(yolo::nms(
            candidates,
            yolo::NMS_IOU_THRESHOLD,
            yolo::MAX_DETECTIONS,
        ))
    }

    fn warm_up(&self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}

/// Tract-based ONNX top-1 classifier.
pub struct TractClassifier {
    model: OnnxPlan,
    input_size: u32,
}

impl TractClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        Ok(Self {
            model: load_plan(model_path.as_ref(), input_size)?,
            input_size,
        })
    }
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify(&self, crop: &RgbImage) -> Result<Classification> {
        ensure_not_empty(crop)?;
        let input = yolo::center_crop(crop, self.input_size);
        let outputs = self
            .model
            .run(tvec!(to_tensor(&input).into()))
            .context("ONNX classifier inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("classifier produced no outputs"))?;
        let scores: Vec<f32> = output
            .to_array_view::<f32>()
            .context("classifier output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        if scores.len() != CLASSIFIER_CLASSES.len() {
            return Err(anyhow!(
                "classifier produced {} scores, taxonomy has {} classes",
                scores.len(),
                CLASSIFIER_CLASSES.len()
            ));
        }
        yolo::top1(&scores).ok_or_else(|| anyhow!("classifier produced no finite scores"))
    }
}

/// Loads `.onnx` checkpoints through tract.
pub struct TractLoader {
    pub detector_input: u32,
    pub classifier_input: u32,
}

impl Default for TractLoader {
    fn default() -> Self {
        Self {
            detector_input: DEFAULT_DETECTOR_INPUT,
            classifier_input: DEFAULT_CLASSIFIER_INPUT,
        }
    }
}

impl ModelLoader for TractLoader {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn handles(&self, location: &str) -> bool {
        !location.contains("://")
            && Path::new(location)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
    }

    fn load_detector(&self, location: &str, device: Device) -> Result<Box<dyn Detector>> {
        warn_if_gpu(device);
        Ok(Box::new(TractDetector::new(location, self.detector_input)?))
    }

    fn load_classifier(&self, location: &str, device: Device) -> Result<Box<dyn Classifier>> {
        warn_if_gpu(device);
        Ok(Box::new(TractClassifier::new(location, self.classifier_input)?))
    }
}
