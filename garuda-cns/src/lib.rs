//! garuda-cns: control side of the Garuda mission supervisor
//!
//! Provides:
//! - Minimal-turn heading correction
//! - Vehicle link abstraction and a simulated vehicle
//! - Command dispatch with one command in flight per channel
//! - The mission state machine and the async runtime that drives it
//! - An operator handle for heading, servo, resume and quit requests

pub mod dispatcher;
pub mod error;
pub mod heading;
pub mod link;
pub mod operator;
pub mod runtime;
pub mod supervisor;

pub use dispatcher::{CommandDispatcher, Completion, DispatchStats, RetryPolicy, Submission, Ticket};
pub use error::{CnsError, DispatchError};
pub use heading::{normalize_error, HeadingController};
pub use link::{LinkAck, LinkFault, SimulatedVehicle, VehicleLink};
pub use operator::OperatorHandle;
pub use runtime::{event_channel, MissionExit, MissionReport, MissionRuntime};
pub use supervisor::{CommitPolicy, EventOutcome, MissionSupervisor, Termination, Transition};
