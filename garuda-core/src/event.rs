//! Messages delivered to the mission supervisor
//!
//! The supervisor is the single consumer of these; perception, operator and
//! telemetry activities only ever talk to it through [`SupervisorEvent`].

use crate::error::{InferenceError, LinkError, ValidationError};
use crate::types::{DetectionSummary, MissionState, VehicleTelemetry};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Operator intake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperatorCommand {
    /// Turn to a compass heading, `[0, 360]`
    SetAbsoluteHeading(f32),
    /// Turn by a signed offset, `[-180, 180]`, positive clockwise
    SetRelativeHeading(f32),
    /// Drive a servo output directly
    SetServo { channel: u8, pwm: u16 },
    /// Confirm that a halted or overridden mission may continue
    Resume,
    QueryStatus,
    Quit,
}

impl OperatorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorCommand::SetAbsoluteHeading(_) => "SetAbsoluteHeading",
            OperatorCommand::SetRelativeHeading(_) => "SetRelativeHeading",
            OperatorCommand::SetServo { .. } => "SetServo",
            OperatorCommand::Resume => "Resume",
            OperatorCommand::QueryStatus => "QueryStatus",
            OperatorCommand::Quit => "Quit",
        }
    }
}

/// Answer returned to the operator surface
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorReply {
    Accepted(MissionState),
    Rejected(ValidationError),
    /// Command was valid but the vehicle refused or the link failed
    Failed(String),
    Status(MissionState),
}

/// Operator command plus the channel its answer goes back on
#[derive(Debug)]
pub struct OperatorRequest {
    pub command: OperatorCommand,
    pub reply: Option<oneshot::Sender<OperatorReply>>,
}

impl OperatorRequest {
    pub fn new(command: OperatorCommand) -> (Self, oneshot::Receiver<OperatorReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { command, reply: Some(tx) }, rx)
    }

    /// Fire-and-forget request
    pub fn detached(command: OperatorCommand) -> Self {
        Self { command, reply: None }
    }
}

/// Why the perception activity gave up
#[derive(Debug, Clone, PartialEq)]
pub enum PerceptionFault {
    Inference(InferenceError),
    Camera(String),
}

impl std::fmt::Display for PerceptionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PerceptionFault::Inference(err) => write!(f, "{}", err),
            PerceptionFault::Camera(reason) => write!(f, "camera failure: {}", reason),
        }
    }
}

/// Event consumed by the supervisor
#[derive(Debug)]
pub enum SupervisorEvent {
    Detection(DetectionSummary),
    Telemetry(VehicleTelemetry),
    Operator(OperatorRequest),
    LinkFailed(LinkError),
    PerceptionFault(PerceptionFault),
    /// Frame source ran dry; the mission itself continues
    PerceptionEnded,
}

impl SupervisorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SupervisorEvent::Detection(_) => "detection",
            SupervisorEvent::Telemetry(_) => "telemetry",
            SupervisorEvent::Operator(_) => "operator",
            SupervisorEvent::LinkFailed(_) => "link_failed",
            SupervisorEvent::PerceptionFault(_) => "perception_fault",
            SupervisorEvent::PerceptionEnded => "perception_ended",
        }
    }
}
