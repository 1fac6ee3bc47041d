//! Error types for garuda-cns

use garuda_core::error::{Error as CoreError, ErrorKind, LinkError, ValidationError};
use thiserror::Error;

/// Outcome of a command the dispatcher could not get acknowledged
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Retry budget spent or connection lost; ends the mission
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Vehicle refused the command; the mission carries on
    #[error("{command} rejected by vehicle: {reason}")]
    Rejected { command: String, reason: String },

    /// A newer command for the same channel replaced this one before it was sent
    #[error("{0} superseded before it was sent")]
    Superseded(String),

    #[error("dispatcher closed")]
    Closed,
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::Link(_))
    }

    pub fn link_error(&self) -> Option<&LinkError> {
        match self {
            DispatchError::Link(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum CnsError {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Supervisor is no longer running")]
    SupervisorGone,

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl CnsError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CnsError::Dispatch(DispatchError::Link(_)) => Some(ErrorKind::Link),
            CnsError::Validation(_) => Some(ErrorKind::Validation),
            CnsError::Core(err) => Some(err.kind()),
            _ => None,
        }
    }
}
