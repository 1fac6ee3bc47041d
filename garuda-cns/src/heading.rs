//! Minimal-turn yaw correction

use garuda_core::error::ValidationError;
use garuda_core::types::{HeadingCommand, TurnDirection};

/// Signed turn from `current` to `target`, normalized into `(-180, 180]`.
/// Positive is clockwise.
pub fn normalize_error(current: f32, target: f32) -> f32 {
    let mut error = target - current.rem_euclid(360.0);
    if error > 180.0 {
        error -= 360.0;
    } else if error <= -180.0 {
        error += 360.0;
    }
    error
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadingController {
    angular_speed: f32,
}

impl HeadingController {
    pub fn new(angular_speed: f32) -> Self {
        Self { angular_speed }
    }

    pub fn angular_speed(&self) -> f32 {
        self.angular_speed
    }

    /// Turn from `current` to compass heading `target` by the shorter way round
    pub fn absolute(&self, current: f32, target: f32) -> Result<HeadingCommand, ValidationError> {
        if !target.is_finite() || !current.is_finite() {
            return Err(ValidationError::NotFinite);
        }
        if !(0.0..=360.0).contains(&target) {
            return Err(ValidationError::AbsoluteHeadingOutOfRange(target));
        }
        Ok(self.turn(normalize_error(current, target)))
    }

    /// Turn by `delta` degrees, positive clockwise
    pub fn relative(&self, delta: f32) -> Result<HeadingCommand, ValidationError> {
        if !delta.is_finite() {
            return Err(ValidationError::NotFinite);
        }
        if !(-180.0..=180.0).contains(&delta) {
            return Err(ValidationError::RelativeHeadingOutOfRange(delta));
        }
        Ok(self.turn(delta))
    }

    fn turn(&self, delta: f32) -> HeadingCommand {
        HeadingCommand {
            angle: delta.abs(),
            angular_speed: self.angular_speed,
            direction: if delta >= 0.0 {
                TurnDirection::Clockwise
            } else {
                TurnDirection::CounterClockwise
            },
            relative: true,
        }
    }
}

impl Default for HeadingController {
    fn default() -> Self {
        Self::new(25.0)
    }
}
