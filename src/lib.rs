//! Power-line inspection cascade
//!
//! Real-time analysis of aerial inspection video. Each frame goes through a
//! two-stage cascade: an object detector finds line hardware, and a
//! classifier decides the condition of every detected object (nominal, or a
//! specific defect such as rust, a bird nest or a missing cap).
//!
//! # Architecture
//!
//! ```text
//! VideoSource ─▶ FrameQueue (2) ─▶ InferenceWorker ─▶ CascadeEngine ─▶ AnnotationRenderer
//!                                        │
//!                                        └─▶ subscribers: annotated images, (image, FrameResult)
//! ```
//!
//! - The queue never blocks the producer: when full, new frames are dropped.
//! - The worker assigns frame indices 0, 1, 2, … to frames that were analysed.
//! - A detection survives only if both confidences reach the threshold of
//!   its condition (`good_threshold` for nominal, `defect_threshold` for
//!   defects).
//! - Engine configuration is swapped atomically; a failed reload leaves the
//!   previous models in service.
//!
//! # Module Structure
//!
//! - `taxonomy`: fixed detector/classifier class tables and condition tags
//! - `config`: engine configuration file, env overrides, thresholds
//! - `detect`: model capability traits, backends (stub, tract ONNX), results
//! - `engine`: the cascade and its reloadable snapshot
//! - `frame`: frames and the bounded drop-newest queue
//! - `render`: box/label/heatmap overlays
//! - `worker`: the background inference loop
//! - `ingest`: frame sources and the producer pump
//! - `report`: session aggregation and defect reports

pub mod config;
pub mod detect;
pub mod engine;
pub mod frame;
pub mod ingest;
pub mod render;
pub mod report;
pub mod taxonomy;
pub mod worker;

pub use config::{ConfigWatcher, Device, EngineConfig, Thresholds};
pub use detect::{
    BBox, Classification, Classifier, Detection, Detector, FrameResult, ModelLoader,
    ModelRegistry, ModelRole, RawDetection, StubClassifier, StubDetector,
};
pub use engine::{CascadeEngine, EngineError, EngineSnapshot, MIN_CROP_SIDE};
pub use frame::{Frame, FrameQueue, QueueStats, FRAME_QUEUE_CAPACITY};
pub use ingest::{run_producer, ProducerStats, SourceConfig, SourceStats, VideoSource};
pub use render::AnnotationRenderer;
pub use report::{JsonReportWriter, Metrics, ReportRow, ReportSink, SessionCollector};
pub use taxonomy::{Condition, DefectClass, ObjectClass};
pub use worker::{AnnotatedFrame, InferenceWorker};
