pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod shutdown;
pub mod types;

pub use config::{
    CaptureConfig, CollisionPolicy, GarudaConfig, HeadingConfig, LinkConfig, MarkerLabels,
    MissionConfig, ResumePolicy, ServoConfig, VisionConfig,
};
pub use error::{
    ConfigError, Error, ErrorKind, InferenceError, LabelLookupError, LinkError, OrderingError,
    PersistenceError, Result, ValidationError,
};
pub use event::{OperatorCommand, OperatorReply, OperatorRequest, PerceptionFault, SupervisorEvent};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use types::{
    CaptureCategory, CaptureRecord, CommandChannel, Detection, DetectionSummary, FlightMode,
    Frame, FrameMeta, HeadingCommand, MissionMode, MissionState, NormalizedBox, PixelBox,
    RawDetection, ServoCommand, ShapeCounts, TurnDirection, VehicleCommand, VehicleTelemetry,
};
