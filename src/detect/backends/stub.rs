use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::config::Device;
use crate::detect::backend::{Classifier, Detector};
use crate::detect::registry::ModelLoader;
use crate::detect::result::{Classification, RawDetection};
use crate::taxonomy::{DefectClass, ObjectClass};

/// Location prefix resolved to the built-in stub models.
pub const STUB_SCHEME: &str = "stub://";

enum StubBoxes {
    Fixed(Vec<RawDetection>),
    /// One box over the central half of whatever frame is passed in.
    Centered { class_index: usize, confidence: f32 },
}

/// Deterministic detector for tests and dry runs.
pub struct StubDetector {
    boxes: StubBoxes,
    fail: bool,
    calls: AtomicUsize,
}

impl StubDetector {
    /// Return the same detections, in this order, for every frame.
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            boxes: StubBoxes::Fixed(detections),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn centered(class: ObjectClass, confidence: f32) -> Self {
        Self {
            boxes: StubBoxes::Centered {
                class_index: class.index(),
                confidence,
            },
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// A detector whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("stub detector configured to fail"));
        }
        match &self.boxes {
            StubBoxes::Fixed(detections) => Ok(detections.clone()),
            StubBoxes::Centered {
                class_index,
                confidence,
            } => {
                let (w, h) = (image.width() as f32, image.height() as f32);
                Ok(vec![RawDetection {
                    bbox: [w * 0.25, h * 0.25, w * 0.75, h * 0.75],
                    confidence: *confidence,
                    class_index: *class_index,
                }])
            }
        }
    }
}

/// Deterministic classifier for tests and dry runs.
///
/// Call `n` returns `outputs[n % outputs.len()]`.
pub struct StubClassifier {
    outputs: Vec<Classification>,
    fail: bool,
    calls: AtomicUsize,
    crop_sizes: Mutex<Vec<(u32, u32)>>,
}

impl StubClassifier {
    pub fn new(outputs: Vec<Classification>) -> Self {
        Self {
            outputs,
            fail: false,
            calls: AtomicUsize::new(0),
            crop_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `class` with `confidence`.
    pub fn constant(class: DefectClass, confidence: f32) -> Self {
        Self::new(vec![Classification {
            class_index: class.index(),
            confidence,
        }])
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(width, height)` of every crop received so far.
    pub fn crop_sizes(&self) -> Vec<(u32, u32)> {
        self.crop_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&self, crop: &RgbImage) -> Result<Classification> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.crop_sizes.lock() {
            sizes.push(crop.dimensions());
        }
        if self.fail {
            return Err(anyhow!("stub classifier configured to fail"));
        }
        if self.outputs.is_empty() {
            return Err(anyhow!("stub classifier has no scripted outputs"));
        }
        Ok(self.outputs[call % self.outputs.len()])
    }
}

/// Loads stub models for `stub://` locations.
///
/// `stub://…defect…` classifiers report a rusted vari-grip, every other stub
/// classifier a nominal one. Stub detectors report one centred vari-grip.
pub struct StubLoader;

impl ModelLoader for StubLoader {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn handles(&self, location: &str) -> bool {
        location.starts_with(STUB_SCHEME)
    }

    fn load_detector(&self, location: &str, _device: Device) -> Result<Box<dyn Detector>> {
        let class = ObjectClass::from_name("vari-grip")
            .ok_or_else(|| anyhow!("stub detector class missing from taxonomy"))?;
        log::debug!("stub detector for {}", location);
        Ok(Box::new(StubDetector::centered(class, 0.9)))
    }

    fn load_classifier(&self, location: &str, _device: Device) -> Result<Box<dyn Classifier>> {
        let (label, confidence) = if location.contains("defect") {
            ("vari-grip_rust", 0.92)
        } else {
            ("vari-grip_good", 0.8)
        };
        let class = DefectClass::from_name(label)
            .ok_or_else(|| anyhow!("stub classifier class missing from taxonomy"))?;
        Ok(Box::new(StubClassifier::constant(class, confidence)))
    }
}
