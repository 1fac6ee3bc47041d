//! Error types for garuda-eye

use garuda_core::error::{Error as CoreError, InferenceError, PersistenceError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Frame error: {0}")]
    Frame(String),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl VisionError {
    /// Camera-side failures as opposed to inference failures
    pub fn is_camera(&self) -> bool {
        matches!(self, VisionError::Camera(_) | VisionError::Frame(_) | VisionError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Camera("device unplugged".to_string());
        assert!(err.to_string().contains("Camera error"));
        assert!(err.to_string().contains("device unplugged"));
    }

    #[test]
    fn test_vision_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no device");
        let vision_err: VisionError = io_err.into();
        assert!(matches!(vision_err, VisionError::Io(_)));
        assert!(vision_err.is_camera());
    }

    #[test]
    fn test_inference_error_is_not_camera() {
        let err: VisionError = InferenceError::Backend {
            seq: 4,
            reason: "tensor shape".to_string(),
        }
        .into();
        assert!(!err.is_camera());
        assert!(err.to_string().contains("frame 4"));
    }
}
