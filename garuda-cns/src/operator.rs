//! Operator surface
//!
//! Cloneable handle that turns operator intent into supervisor events and waits
//! for the supervisor's answer.

use crate::error::CnsError;
use garuda_core::event::{OperatorCommand, OperatorReply, OperatorRequest, SupervisorEvent};
use garuda_core::types::MissionState;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OperatorHandle {
    events: mpsc::Sender<SupervisorEvent>,
}

impl OperatorHandle {
    pub fn new(events: mpsc::Sender<SupervisorEvent>) -> Self {
        Self { events }
    }

    pub async fn set_absolute_heading(&self, degrees: f32) -> Result<MissionState, CnsError> {
        self.command(OperatorCommand::SetAbsoluteHeading(degrees)).await
    }

    pub async fn set_relative_heading(&self, degrees: f32) -> Result<MissionState, CnsError> {
        self.command(OperatorCommand::SetRelativeHeading(degrees)).await
    }

    pub async fn set_servo(&self, channel: u8, pwm: u16) -> Result<MissionState, CnsError> {
        self.command(OperatorCommand::SetServo { channel, pwm }).await
    }

    pub async fn resume(&self) -> Result<MissionState, CnsError> {
        self.command(OperatorCommand::Resume).await
    }

    pub async fn query_status(&self) -> Result<MissionState, CnsError> {
        self.command(OperatorCommand::QueryStatus).await
    }

    pub async fn quit(&self) -> Result<MissionState, CnsError> {
        self.command(OperatorCommand::Quit).await
    }

    /// Send `command` and return the raw reply
    pub async fn request(&self, command: OperatorCommand) -> Result<OperatorReply, CnsError> {
        debug!(command = command.name(), "operator request");
        let (request, reply) = OperatorRequest::new(command);
        self.events
            .send(SupervisorEvent::Operator(request))
            .await
            .map_err(|_| CnsError::SupervisorGone)?;
        reply.await.map_err(|_| CnsError::SupervisorGone)
    }

    async fn command(&self, command: OperatorCommand) -> Result<MissionState, CnsError> {
        match self.request(command).await? {
            OperatorReply::Accepted(state) | OperatorReply::Status(state) => Ok(state),
            OperatorReply::Rejected(reason) => Err(CnsError::Validation(reason)),
            OperatorReply::Failed(reason) => Err(CnsError::CommandFailed(reason)),
        }
    }
}
