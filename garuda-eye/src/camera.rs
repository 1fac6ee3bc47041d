//! Frame sources
//!
//! Capture hardware is driven outside this crate; anything that can hand over
//! RGB frames implements [`FrameSource`].

use crate::error::VisionError;
use image::RgbImage;
use std::collections::VecDeque;
use tracing::info;

/// Blocking source of RGB frames, polled from the perception thread
pub trait FrameSource {
    /// Next frame; `Ok(None)` means the stream has ended
    fn grab(&mut self) -> Result<Option<RgbImage>, VisionError>;

    /// Release the underlying device. Called once when perception stops.
    fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn grab(&mut self) -> Result<Option<RgbImage>, VisionError> {
        (**self).grab()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Replays a fixed list of frames and camera faults, for tests and dry runs
#[derive(Debug, Default)]
pub struct ScriptedFrameSource {
    script: VecDeque<Result<RgbImage, String>>,
    released: bool,
}

impl ScriptedFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` solid-colour frames of the given size
    pub fn solid(count: usize, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut source = Self::new();
        for _ in 0..count {
            source = source.frame(RgbImage::from_pixel(width, height, image::Rgb(rgb)));
        }
        source
    }

    pub fn frame(mut self, image: RgbImage) -> Self {
        self.script.push_back(Ok(image));
        self
    }

    /// A read failure at this point in the stream
    pub fn fault(mut self, reason: impl Into<String>) -> Self {
        self.script.push_back(Err(reason.into()));
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for ScriptedFrameSource {
    fn grab(&mut self) -> Result<Option<RgbImage>, VisionError> {
        if self.released {
            return Err(VisionError::Camera("source already released".to_string()));
        }
        match self.script.pop_front() {
            Some(Ok(image)) => Ok(Some(image)),
            Some(Err(reason)) => Err(VisionError::Camera(reason)),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        if !self.released {
            info!(remaining = self.script.len(), "scripted frame source released");
            self.released = true;
        }
    }
}
