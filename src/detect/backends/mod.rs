pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubClassifier, StubDetector, StubLoader, STUB_SCHEME};

#[cfg(feature = "backend-tract")]
pub use tract::{TractClassifier, TractDetector, TractLoader};
