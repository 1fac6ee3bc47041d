//! Error taxonomy shared by every Garuda crate
//!
//! Each failure class has its own type so call sites can decide locally whether
//! it drops a detection, a frame, or the whole mission. [`Error`] wraps them all
//! for reporting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse classification used when an escalation is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    LabelLookup,
    Persistence,
    Link,
    Inference,
    Ordering,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::LabelLookup => "LabelLookupError",
            ErrorKind::Persistence => "PersistenceError",
            ErrorKind::Link => "LinkError",
            ErrorKind::Inference => "InferenceError",
            ErrorKind::Ordering => "OrderingError",
            ErrorKind::Config => "ConfigError",
        }
    }

    /// Whether an error of this kind ends the mission on its own
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Link)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bad operator input; always rejected before any command is built
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("absolute heading {0} outside [0, 360]")]
    AbsoluteHeadingOutOfRange(f32),

    #[error("relative heading {0} outside [-180, 180]")]
    RelativeHeadingOutOfRange(f32),

    #[error("heading value is not a finite number")]
    NotFinite,

    #[error("servo pwm {pwm} outside [{min}, {max}]")]
    PwmOutOfRange { pwm: u16, min: u16, max: u16 },

    #[error("vehicle is not armed; {0} rejected")]
    NotArmed(String),

    #[error("no heading telemetry received yet")]
    HeadingUnknown,

    #[error("mission already terminated")]
    Terminated,
}

/// Class index returned by the model has no entry in the label table
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("class index {index} not in label table of {table_len} entries")]
pub struct LabelLookupError {
    pub index: i64,
    pub table_len: usize,
}

/// Capture could not be encoded or written
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("failed to persist capture {path}: {reason}")]
pub struct PersistenceError {
    pub path: String,
    pub reason: String,
}

/// Vehicle link failed beyond its retry budget, or the connection is gone
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkError {
    #[error("{command} timed out {attempts} consecutive times")]
    RetriesExhausted { command: String, attempts: u32 },

    #[error("link disconnected: {0}")]
    Disconnected(String),
}

/// Inference call failed for one frame
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceError {
    #[error("inference backend failed on frame {seq}: {reason}")]
    Backend { seq: u64, reason: String },

    #[error("input buffer mismatch: expected {expected} bytes, got {actual}")]
    InputMismatch { expected: usize, actual: usize },

    #[error("{count} consecutive perception failures, last: {last}")]
    Escalated { count: u32, last: String },
}

/// Detection summary delivered out of capture order
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("frame {got} arrived after frame {last}")]
pub struct OrderingError {
    pub last: u64,
    pub got: u64,
}

/// Configuration could not be loaded or is inconsistent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Any Garuda error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    LabelLookup(#[from] LabelLookupError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Ordering(#[from] OrderingError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::LabelLookup(_) => ErrorKind::LabelLookup,
            Error::Persistence(_) => ErrorKind::Persistence,
            Error::Link(_) => ErrorKind::Link,
            Error::Inference(_) => ErrorKind::Inference,
            Error::Ordering(_) => ErrorKind::Ordering,
            Error::Config(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err: Error = LinkError::Disconnected("serial closed".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Link);
        assert!(err.kind().is_fatal());

        let err: Error = LabelLookupError { index: 7, table_len: 3 }.into();
        assert_eq!(err.kind(), ErrorKind::LabelLookup);
        assert!(!err.kind().is_fatal());
    }

    #[test]
    fn test_display_carries_condition() {
        let err = LinkError::RetriesExhausted {
            command: "SetMode(Guided)".to_string(),
            attempts: 3,
        };
        let text = err.to_string();
        assert!(text.contains("SetMode(Guided)"));
        assert!(text.contains('3'));
        assert_eq!(ErrorKind::Link.to_string(), "LinkError");
    }

    #[test]
    fn test_transparent_wrapping() {
        let inner = ValidationError::AbsoluteHeadingOutOfRange(400.0);
        let err: Error = inner.clone().into();
        assert_eq!(err.to_string(), inner.to_string());
    }
}
