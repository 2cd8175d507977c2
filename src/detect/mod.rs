mod backend;
pub mod backends;
mod registry;
mod result;
#[cfg_attr(not(feature = "backend-tract"), allow(dead_code))]
mod yolo;

pub use backend::{Classifier, Detector, ModelRole};
pub use backends::{StubClassifier, StubDetector, StubLoader};
pub use registry::{ModelLoader, ModelRegistry};
pub use result::{BBox, Classification, Detection, FrameResult, RawDetection};
