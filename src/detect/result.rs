use serde::Serialize;

use crate::taxonomy::{Condition, DefectClass, ObjectClass};

/// Integer pixel box, `x1 < x2` and `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "[i32; 4]")]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    /// Returns `None` for empty or inverted boxes.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
        (x1 < x2 && y1 < y2).then_some(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1) as u32
    }

    /// Intersect with a `width` x `height` image. `None` if nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let w = width.min(i32::MAX as u32) as i32;
        let h = height.min(i32::MAX as u32) as i32;
        Self::new(
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
            self.x2.clamp(0, w),
            self.y2.clamp(0, h),
        )
    }
}

impl From<BBox> for [i32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Detector output before cropping and classification.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    /// Frame pixel coordinates `[x1, y1, x2, y2]`, possibly fractional or
    /// extending past the frame edge.
    pub bbox: [f32; 4],
    pub confidence: f32,
    /// Index into the detector taxonomy.
    pub class_index: usize,
}

impl RawDetection {
    /// Truncate to integer pixels and clip to the frame.
    pub fn pixel_box(&self, width: u32, height: u32) -> Option<BBox> {
        let [x1, y1, x2, y2] = self.bbox;
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return None;
        }
        BBox {
            x1: x1 as i32,
            y1: y1 as i32,
            x2: x2 as i32,
            y2: y2 as i32,
        }
        .clamp_to(width, height)
    }
}

/// Top-1 classifier output for one crop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
    /// Index into the classifier taxonomy.
    pub class_index: usize,
    pub confidence: f32,
}

/// One surviving candidate object in a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BBox,
    pub object_class: ObjectClass,
    pub object_confidence: f32,
    pub defect_class: DefectClass,
    pub defect_confidence: f32,
}

impl Detection {
    pub fn condition(&self) -> Condition {
        self.defect_class.condition()
    }

    pub fn is_defect(&self) -> bool {
        self.defect_class.is_defect()
    }
}

/// Structured result for one analysed frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameResult {
    pub frame_idx: u64,
    /// Detector output order.
    pub detections: Vec<Detection>,
}

impl FrameResult {
    pub fn has_defect(&self) -> bool {
        self.detections.iter().any(Detection::is_defect)
    }

    /// Whether a Defect-condition detection reaches `cutoff`.
    pub fn has_defect_at(&self, cutoff: f32) -> bool {
        self.detections
            .iter()
            .any(|d| d.is_defect() && d.defect_confidence >= cutoff)
    }
}
