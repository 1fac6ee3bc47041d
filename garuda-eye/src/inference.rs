//! Inference backend seam and model input preparation

use garuda_core::error::InferenceError;
use garuda_core::types::{Frame, RawDetection};
use image::imageops::{self, FilterType};
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Frame resized to the model's fixed input size, RGB8 row-major
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub frame_seq: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ModelInput {
    /// Resize `frame` to `size` (`(width, height)`); a frame already at that size is
    /// copied as-is
    pub fn from_frame(frame: &Frame, size: (u32, u32)) -> Result<Self, InferenceError> {
        let (width, height) = size;
        let expected = frame.width() as usize * frame.height() as usize * 3;
        let image = RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or(InferenceError::InputMismatch {
                expected,
                actual: frame.data().len(),
            })?;

        let data = if (frame.width(), frame.height()) == size {
            image.into_raw()
        } else {
            imageops::resize(&image, width, height, FilterType::Triangle).into_raw()
        };

        Ok(Self {
            frame_seq: frame.seq(),
            width,
            height,
            data,
        })
    }
}

/// Object detector. Each call is independent of the previous one.
pub trait InferenceBackend {
    /// `(width, height)` the model expects
    fn input_size(&self) -> (u32, u32);

    fn infer(&mut self, input: &ModelInput) -> Result<Vec<RawDetection>, InferenceError>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }

    fn infer(&mut self, input: &ModelInput) -> Result<Vec<RawDetection>, InferenceError> {
        (**self).infer(input)
    }
}

/// Backend that answers from a script; once the script runs out every frame
/// yields no detections
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    input_size: (u32, u32),
    script: VecDeque<Result<Vec<RawDetection>, String>>,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedBackend {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            script: VecDeque::new(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn respond(mut self, detections: Vec<RawDetection>) -> Self {
        self.script.push_back(Ok(detections));
        self
    }

    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.script.push_back(Err(reason.into()));
        self
    }

    /// Frame sequence numbers the backend has been called with
    pub fn seen(&self) -> Arc<Mutex<Vec<u64>>> {
        self.seen.clone()
    }
}

impl InferenceBackend for ScriptedBackend {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn infer(&mut self, input: &ModelInput) -> Result<Vec<RawDetection>, InferenceError> {
        let expected = self.input_size.0 as usize * self.input_size.1 as usize * 3;
        if input.data.len() != expected {
            return Err(InferenceError::InputMismatch {
                expected,
                actual: input.data.len(),
            });
        }
        self.seen.lock().push(input.frame_seq);
        match self.script.pop_front() {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(reason)) => Err(InferenceError::Backend {
                seq: input.frame_seq,
                reason,
            }),
            None => Ok(Vec::new()),
        }
    }
}
