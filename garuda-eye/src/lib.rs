//! garuda-eye: perception for the Garuda mission supervisor
//!
//! Frames come in from a [`FrameSource`], go through an [`InferenceBackend`],
//! and leave as one [`DetectionSummary`](garuda_core::DetectionSummary) per frame
//! for the supervisor. Frames that qualify are captured to disk on the way.

pub mod aggregator;
pub mod camera;
pub mod capture;
pub mod error;
pub mod inference;
pub mod labels;
pub mod perception;

pub use aggregator::DetectionAggregator;
pub use camera::{FrameSource, ScriptedFrameSource};
pub use capture::{
    CaptureNaming, CapturePolicy, CaptureRecorder, CaptureSink, JpegFileSink, MemorySink,
};
pub use error::VisionError;
pub use inference::{InferenceBackend, ModelInput, ScriptedBackend};
pub use labels::LabelTable;
pub use perception::{PerceptionExit, PerceptionLoop, PerceptionStats};
