//! Configuration for a Garuda mission
//!
//! Every section has working defaults so a mission can start from
//! `GarudaConfig::default()`; files only need to name what they change.

use crate::error::ConfigError;
use crate::types::FlightMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Label names the aggregator gives meaning to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerLabels {
    pub square: String,
    pub triangle: String,
    pub hotspot: String,
}

impl Default for MarkerLabels {
    fn default() -> Self {
        Self {
            square: "square".to_string(),
            triangle: "triangle".to_string(),
            hotspot: "circle".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Detections at or below this confidence are discarded
    pub min_confidence: f32,
    pub labels: MarkerLabels,
    /// Consecutive dropped frames before perception escalates
    pub max_consecutive_failures: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.9,
            labels: MarkerLabels::default(),
            max_consecutive_failures: 5,
        }
    }
}

/// What happens when two captures of one category land in the same second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionPolicy {
    /// Append `_1`, `_2`, ... to later captures in the same second
    Disambiguate,
    /// Reuse the bare name; the newest capture wins
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub shapes_dir: PathBuf,
    pub hotspot_dir: PathBuf,
    pub collision_policy: CollisionPolicy,
    pub jpeg_quality: u8,
    /// Draw detection boxes onto saved captures
    pub annotate: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shapes_dir: PathBuf::from("captures/shapes"),
            hotspot_dir: PathBuf::from("captures/hotspots"),
            collision_policy: CollisionPolicy::Disambiguate,
            jpeg_quality: 90,
            annotate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadingConfig {
    /// Yaw rate in degrees per second
    pub angular_speed: f32,
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self { angular_speed: 25.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub release_channel: u8,
    pub release_pwm: u16,
    pub reset_pwm: u16,
    pub min_pwm: u16,
    pub max_pwm: u16,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            release_channel: 9,
            release_pwm: 1900,
            reset_pwm: 1100,
            min_pwm: 1000,
            max_pwm: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Attempts per command before a timeout becomes a `LinkError`
    pub max_attempts: u32,
    pub command_timeout_ms: u64,
    pub telemetry_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            command_timeout_ms: 1500,
            telemetry_interval_ms: 500,
        }
    }
}

impl LinkConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }
}

/// How a halted mission is allowed back into AUTO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumePolicy {
    /// Only after an operator `Resume`
    Operator,
    /// Also once frames have been clear of interrupts for this long
    AutoAfter { clear_for_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub resume_policy: ResumePolicy,
    /// Extra labels that halt the mission, on top of the hotspot label
    pub stop_classes: Vec<String>,
    /// Mode the vehicle is put in when halting or terminating
    pub safe_mode: FlightMode,
    pub event_queue_size: usize,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            resume_policy: ResumePolicy::Operator,
            stop_classes: Vec::new(),
            safe_mode: FlightMode::Guided,
            event_queue_size: 64,
        }
    }
}

/// Complete mission configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GarudaConfig {
    pub vision: VisionConfig,
    pub capture: CaptureConfig,
    pub heading: HeadingConfig,
    pub servo: ServoConfig,
    pub link: LinkConfig,
    pub mission: MissionConfig,
}

impl GarudaConfig {
    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text, trying JSON, then TOML, then YAML
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<GarudaConfig>(content) {
            return Ok(config);
        }

        let toml_err = match toml::from_str::<GarudaConfig>(content) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };

        match serde_yaml::from_str::<GarudaConfig>(content) {
            Ok(config) => Ok(config),
            Err(yaml_err) => Err(ConfigError::Parse(format!(
                "not JSON, TOML ({}) or YAML ({})",
                toml_err, yaml_err
            ))),
        }
    }

    /// Defaults overridden by `GARUDA_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `GARUDA_*` environment overrides in place
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<f32>("GARUDA_MIN_CONFIDENCE") {
            self.vision.min_confidence = v;
        }
        if let Ok(dir) = std::env::var("GARUDA_CAPTURE_DIR") {
            let base = PathBuf::from(dir);
            self.capture.shapes_dir = base.join("shapes");
            self.capture.hotspot_dir = base.join("hotspots");
        }
        if let Some(v) = env_parse::<f32>("GARUDA_ANGULAR_SPEED") {
            self.heading.angular_speed = v;
        }
        if let Some(v) = env_parse::<u32>("GARUDA_LINK_ATTEMPTS") {
            self.link.max_attempts = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let confidence = self.vision.min_confidence;
        if !confidence.is_finite() || !(0.0..1.0).contains(&confidence) {
            return Err(ConfigError::Validation(format!(
                "vision.min_confidence must be in [0, 1), got {}",
                confidence
            )));
        }

        if self.vision.max_consecutive_failures == 0 {
            return Err(ConfigError::Validation(
                "vision.max_consecutive_failures must be > 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(ConfigError::Validation(
                "capture.jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        let speed = self.heading.angular_speed;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ConfigError::Validation(
                "heading.angular_speed must be > 0".to_string(),
            ));
        }

        let servo = &self.servo;
        if servo.min_pwm >= servo.max_pwm {
            return Err(ConfigError::Validation(
                "servo.min_pwm must be below servo.max_pwm".to_string(),
            ));
        }
        for pwm in [servo.release_pwm, servo.reset_pwm] {
            if pwm < servo.min_pwm || pwm > servo.max_pwm {
                return Err(ConfigError::Validation(format!(
                    "servo pwm {} outside [{}, {}]",
                    pwm, servo.min_pwm, servo.max_pwm
                )));
            }
        }

        if self.link.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "link.max_attempts must be > 0".to_string(),
            ));
        }
        if self.link.command_timeout_ms == 0 || self.link.telemetry_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "link timeouts and intervals must be > 0".to_string(),
            ));
        }

        if self.mission.event_queue_size == 0 {
            return Err(ConfigError::Validation(
                "mission.event_queue_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
