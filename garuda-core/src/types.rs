//! Mission data model

use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One captured RGB8 image, stamped by the perception loop
#[derive(Debug, Clone)]
pub struct Frame {
    seq: u64,
    captured_at: Duration,
    width: u32,
    height: u32,
    data: Bytes,
}

impl Frame {
    /// Create a frame; `data` must hold exactly `width * height * 3` bytes
    pub fn new(
        seq: u64,
        captured_at: Duration,
        width: u32,
        height: u32,
        data: Bytes,
    ) -> Result<Self, String> {
        if width == 0 || height == 0 {
            return Err(format!("frame dimensions must be non-zero, got {}x{}", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(3))
            .ok_or_else(|| format!("frame {}x{} overflows buffer size", width, height))?;
        if data.len() != expected {
            return Err(format!(
                "frame buffer holds {} bytes, {}x{} RGB needs {}",
                data.len(),
                width,
                height,
                expected
            ));
        }
        Ok(Self { seq, captured_at, width, height, data })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn captured_at(&self) -> Duration {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn meta(&self) -> FrameMeta {
        FrameMeta {
            seq: self.seq,
            captured_at: self.captured_at,
            width: self.width,
            height: self.height,
        }
    }
}

/// Frame identity and geometry without the pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub seq: u64,
    pub captured_at: Duration,
    pub width: u32,
    pub height: u32,
}

/// Box in normalized coordinates, ordered `[ymin, xmin, ymax, xmax]` as SSD
/// detectors emit it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox(pub [f32; 4]);

impl NormalizedBox {
    pub fn ymin(&self) -> f32 {
        self.0[0]
    }

    pub fn xmin(&self) -> f32 {
        self.0[1]
    }

    pub fn ymax(&self) -> f32 {
        self.0[2]
    }

    pub fn xmax(&self) -> f32 {
        self.0[3]
    }
}

/// One entry of the inference backend's output batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_index: i64,
    pub confidence: f32,
    pub bbox: NormalizedBox,
}

/// Box in source-image pixel coordinates, every edge within `[1, dimension]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

/// Thresholded, labelled detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: PixelBox,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeCounts {
    pub squares: u32,
    pub triangles: u32,
}

impl ShapeCounts {
    /// At least one square and one triangle in the same frame
    pub fn is_pair(&self) -> bool {
        self.squares > 0 && self.triangles > 0
    }
}

/// Aggregate for exactly one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub frame_seq: u64,
    pub captured_at: Duration,
    pub counts: ShapeCounts,
    pub hotspot_present: bool,
    /// Every detection that passed the confidence threshold, recognized or not
    pub detections: Vec<Detection>,
    /// Detections dropped because their class index had no label
    pub dropped_labels: u32,
}

impl DetectionSummary {
    pub fn empty(meta: FrameMeta) -> Self {
        Self {
            frame_seq: meta.seq,
            captured_at: meta.captured_at,
            counts: ShapeCounts::default(),
            hotspot_present: false,
            detections: Vec::new(),
            dropped_labels: 0,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.detections.iter().any(|d| d.label == label)
    }
}

/// Supervisor-side mission mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissionMode {
    Init,
    Arming,
    Auto,
    Halted,
    ManualOverride,
    Terminated,
}

impl MissionMode {
    pub const ALL: [MissionMode; 6] = [
        MissionMode::Init,
        MissionMode::Arming,
        MissionMode::Auto,
        MissionMode::Halted,
        MissionMode::ManualOverride,
        MissionMode::Terminated,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionMode::Terminated)
    }
}

impl fmt::Display for MissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MissionMode::Init => "INIT",
            MissionMode::Arming => "ARMING",
            MissionMode::Auto => "AUTO",
            MissionMode::Halted => "HALTED",
            MissionMode::ManualOverride => "MANUAL_OVERRIDE",
            MissionMode::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Flight-controller mode as reported and commanded over the link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlightMode {
    Guided,
    Auto,
    Loiter,
    ReturnToLaunch,
    Land,
    Other(String),
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlightMode::Guided => f.write_str("GUIDED"),
            FlightMode::Auto => f.write_str("AUTO"),
            FlightMode::Loiter => f.write_str("LOITER"),
            FlightMode::ReturnToLaunch => f.write_str("RTL"),
            FlightMode::Land => f.write_str("LAND"),
            FlightMode::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnDirection {
    Clockwise,
    CounterClockwise,
}

impl TurnDirection {
    /// Direction parameter as flight controllers expect it (1 = cw, -1 = ccw)
    pub fn as_param(&self) -> i8 {
        match self {
            TurnDirection::Clockwise => 1,
            TurnDirection::CounterClockwise => -1,
        }
    }
}

/// Yaw command; `angle` is always a non-negative magnitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadingCommand {
    pub angle: f32,
    pub angular_speed: f32,
    pub direction: TurnDirection,
    pub relative: bool,
}

impl HeadingCommand {
    /// Signed turn in degrees, positive clockwise
    pub fn signed_delta(&self) -> f32 {
        match self.direction {
            TurnDirection::Clockwise => self.angle,
            TurnDirection::CounterClockwise => -self.angle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServoCommand {
    pub channel: u8,
    pub pwm: u16,
}

/// Dispatcher channel a command occupies while in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandChannel {
    Mode,
    Heading,
    Servo(u8),
}

/// Everything the supervisor can ask the vehicle to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VehicleCommand {
    SetMode(FlightMode),
    Arm,
    Heading(HeadingCommand),
    Servo(ServoCommand),
}

impl VehicleCommand {
    pub fn channel(&self) -> CommandChannel {
        match self {
            VehicleCommand::SetMode(_) | VehicleCommand::Arm => CommandChannel::Mode,
            VehicleCommand::Heading(_) => CommandChannel::Heading,
            VehicleCommand::Servo(servo) => CommandChannel::Servo(servo.channel),
        }
    }
}

impl fmt::Display for VehicleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleCommand::SetMode(mode) => write!(f, "SetMode({})", mode),
            VehicleCommand::Arm => f.write_str("Arm"),
            VehicleCommand::Heading(cmd) => write!(
                f,
                "Heading({:+.1}deg @ {:.0}deg/s{})",
                cmd.signed_delta(),
                cmd.angular_speed,
                if cmd.relative { ", relative" } else { "" }
            ),
            VehicleCommand::Servo(servo) => {
                write!(f, "Servo(ch{} -> {}us)", servo.channel, servo.pwm)
            }
        }
    }
}

/// Telemetry snapshot reported by the vehicle link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleTelemetry {
    /// Compass heading in degrees, `[0, 360)`
    pub heading: f32,
    pub armable: bool,
    pub armed: bool,
    pub mode: FlightMode,
    pub system_status: String,
}

/// The single live mission state, owned by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionState {
    pub mode: MissionMode,
    pub armed: bool,
    pub heading: Option<f32>,
    pub last_heading_error: Option<f32>,
    pub last_command: Option<VehicleCommand>,
    pub last_command_at: Option<Duration>,
    pub halted_at: Option<Duration>,
    pub resume_requested: bool,
    pub last_frame_seq: Option<u64>,
}

impl Default for MissionState {
    fn default() -> Self {
        Self {
            mode: MissionMode::Init,
            armed: false,
            heading: None,
            last_heading_error: None,
            last_command: None,
            last_command_at: None,
            halted_at: None,
            resume_requested: false,
            last_frame_seq: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureCategory {
    ShapePair { squares: u32, triangles: u32 },
    Hotspot,
}

impl CaptureCategory {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureCategory::ShapePair { .. } => "shape-pair",
            CaptureCategory::Hotspot => "hotspot",
        }
    }
}

/// A persisted capture; never mutated after it is written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub category: CaptureCategory,
    pub path: PathBuf,
    pub frame_seq: u64,
    pub timestamp: DateTime<Local>,
}
