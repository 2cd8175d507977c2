//! Fixed detector and classifier taxonomies.
//!
//! Both tables are index-aligned with model outputs. They are a compatibility
//! contract with the checkpoints: reordering an entry here without retraining
//! (or re-exporting) the matching model silently mislabels every detection.
//!
//! Classifier entries carry an explicit [`Condition`] tag. The threshold
//! policy reads the tag; it never inspects label text at detection time.

use std::fmt;

use serde::{Serialize, Serializer};

/// Marker used by the classifier naming convention for nominal conditions.
pub const NOMINAL_MARKER: &str = "good";

/// Detector output classes, in model index order.
pub const DETECTOR_CLASSES: [&str; 18] = [
    "yoke",
    "yoke suspension",
    "spacer",
    "stockbridge damper",
    "lightning rod shackle",
    "lightning rod suspension",
    "polymer insulator",
    "glass insulator",
    "tower id plate",
    "vari-grip",
    "polymer insulator lower shackle",
    "polymer insulator upper shackle",
    "polymer insulator tower shackle",
    "glass insulator big shackle",
    "glass insulator small shackle",
    "glass insulator tower shackle",
    "spiral damper",
    "sphere",
];

/// Classifier output classes (`<object-type>_<condition>`), in model index order.
pub const CLASSIFIER_CLASSES: [(&str, Condition); 11] = [
    ("yoke-suspension_good", Condition::Nominal),
    ("yoke-suspension_rust", Condition::Defect),
    ("vari-grip_good", Condition::Nominal),
    ("vari-grip_rust", Condition::Defect),
    ("polymer-insulator-upper-shackle_rust", Condition::Defect),
    ("vari-grip_bird-nest", Condition::Defect),
    ("polymer-insulator-upper-shackle_good", Condition::Nominal),
    ("glass-insulator_missing-cap", Condition::Defect),
    ("lightning-rod-suspension_good", Condition::Nominal),
    ("lightning-rod-suspension_rust", Condition::Defect),
    ("glass-insulator_good", Condition::Nominal),
];

/// Which threshold branch a classifier outcome belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Nominal,
    Defect,
}

impl Condition {
    /// Derive a tag from the naming convention.
    ///
    /// Only meant for building or auditing tables; detections use the tag
    /// stored alongside each [`CLASSIFIER_CLASSES`] entry.
    pub fn from_label(label: &str) -> Self {
        if label.contains(NOMINAL_MARKER) {
            Condition::Nominal
        } else {
            Condition::Defect
        }
    }

    pub fn is_defect(self) -> bool {
        matches!(self, Condition::Defect)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Nominal => f.write_str("nominal"),
            Condition::Defect => f.write_str("defect"),
        }
    }
}

/// A detector taxonomy entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectClass(u8);

impl ObjectClass {
    pub fn from_index(index: usize) -> Option<Self> {
        (index < DETECTOR_CLASSES.len()).then_some(Self(index as u8))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        DETECTOR_CLASSES
            .iter()
            .position(|candidate| *candidate == name)
            .and_then(Self::from_index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn name(self) -> &'static str {
        DETECTOR_CLASSES[self.index()]
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..DETECTOR_CLASSES.len()).map(|index| Self(index as u8))
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ObjectClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// A classifier taxonomy entry (object type plus condition).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DefectClass(u8);

impl DefectClass {
    pub fn from_index(index: usize) -> Option<Self> {
        (index < CLASSIFIER_CLASSES.len()).then_some(Self(index as u8))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        CLASSIFIER_CLASSES
            .iter()
            .position(|(candidate, _)| *candidate == name)
            .and_then(Self::from_index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn name(self) -> &'static str {
        CLASSIFIER_CLASSES[self.index()].0
    }

    pub fn condition(self) -> Condition {
        CLASSIFIER_CLASSES[self.index()].1
    }

    pub fn is_defect(self) -> bool {
        self.condition().is_defect()
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..CLASSIFIER_CLASSES.len()).map(|index| Self(index as u8))
    }
}

impl fmt::Display for DefectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for DefectClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
