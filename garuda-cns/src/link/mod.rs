//! Vehicle link abstraction
//!
//! The wire protocol lives behind [`VehicleLink`]; the dispatcher is the only
//! caller.

pub mod sim;

use async_trait::async_trait;
use garuda_core::types::{
    FlightMode, HeadingCommand, ServoCommand, VehicleCommand, VehicleTelemetry,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sim::SimulatedVehicle;

/// Acknowledgement from the flight controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAck {
    pub message: Option<String>,
}

/// Failure of a single link call
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFault {
    #[error("timed out")]
    Timeout,

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("disconnected: {0}")]
    Disconnected(String),
}

/// Request/response channel to the flight controller
#[async_trait]
pub trait VehicleLink: Send + Sync {
    async fn send_mode(&self, mode: &FlightMode) -> Result<LinkAck, LinkFault>;

    async fn arm(&self) -> Result<LinkAck, LinkFault>;

    async fn send_heading(&self, command: &HeadingCommand) -> Result<LinkAck, LinkFault>;

    async fn send_servo(&self, command: &ServoCommand) -> Result<LinkAck, LinkFault>;

    async fn telemetry(&self) -> Result<VehicleTelemetry, LinkFault>;

    /// Release the connection; later calls fail with `Disconnected`
    async fn close(&self);
}

/// Route a command to the matching link call
pub async fn send_command(
    link: &dyn VehicleLink,
    command: &VehicleCommand,
) -> Result<LinkAck, LinkFault> {
    match command {
        VehicleCommand::SetMode(mode) => link.send_mode(mode).await,
        VehicleCommand::Arm => link.arm().await,
        VehicleCommand::Heading(heading) => link.send_heading(heading).await,
        VehicleCommand::Servo(servo) => link.send_servo(servo).await,
    }
}
