use garuda_cns::{EventOutcome, MissionSupervisor};
use garuda_core::config::{CollisionPolicy, GarudaConfig, ResumePolicy};
use garuda_core::error::ConfigError;
use garuda_core::event::SupervisorEvent;
use garuda_core::types::{
    Detection, DetectionSummary, FlightMode, FrameMeta, MissionMode, MissionState, PixelBox,
    ServoCommand, VehicleCommand,
};
use std::io::Write;
use std::time::Duration;

const MISSION_TOML: &str = r#"
[vision]
min_confidence = 0.8

[capture]
collision_policy = "Overwrite"

[mission]
stop_classes = ["person"]
safe_mode = "Loiter"
resume_policy = { AutoAfter = { clear_for_ms = 200 } }
"#;

fn summary(seq: u64, at_ms: u64, label: Option<&str>) -> SupervisorEvent {
    let mut summary = DetectionSummary::empty(FrameMeta {
        seq,
        captured_at: Duration::from_millis(at_ms),
        width: 640,
        height: 480,
    });
    if let Some(label) = label {
        summary.detections.push(Detection {
            label: label.to_string(),
            confidence: 0.95,
            bbox: PixelBox {
                xmin: 10,
                ymin: 10,
                xmax: 40,
                ymax: 40,
            },
        });
    }
    SupervisorEvent::Detection(summary)
}

fn load(content: &str, suffix: &str) -> Result<GarudaConfig, ConfigError> {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    GarudaConfig::from_file(file.path())
}

#[test]
fn test_toml_file_overrides_only_named_fields() {
    let config = load(MISSION_TOML, ".toml").unwrap();
    assert_eq!(config.vision.min_confidence, 0.8);
    assert_eq!(config.vision.labels.hotspot, "circle");
    assert_eq!(config.capture.collision_policy, CollisionPolicy::Overwrite);
    assert_eq!(config.mission.safe_mode, FlightMode::Loiter);
    assert_eq!(
        config.mission.resume_policy,
        ResumePolicy::AutoAfter { clear_for_ms: 200 }
    );
    assert_eq!(config.servo.release_pwm, 1900);
    assert_eq!(config.link.max_attempts, 3);
}

#[test]
fn test_invalid_file_is_rejected() {
    let err = load("[servo]\nmin_pwm = 2100\n", ".toml").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));

    let err = load("vision: [not, a, table]\n", ".yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_loaded_config_drives_stop_classes_and_auto_resume() {
    let config = load(MISSION_TOML, ".toml").unwrap();
    let supervisor = MissionSupervisor::new(&config);
    let auto = MissionState {
        mode: MissionMode::Auto,
        armed: true,
        heading: Some(180.0),
        ..MissionState::default()
    };

    let halt = supervisor.transition(&auto, &summary(1, 0, Some("person")));
    assert_eq!(halt.next.mode, MissionMode::Halted);
    assert_eq!(
        halt.actions,
        vec![
            VehicleCommand::Servo(ServoCommand { channel: 9, pwm: 1900 }),
            VehicleCommand::SetMode(FlightMode::Loiter),
        ]
    );

    let early = supervisor.transition(&halt.next, &summary(2, 150, None));
    assert_eq!(early.outcome, EventOutcome::Applied);
    assert_eq!(early.next.mode, MissionMode::Halted);
    assert!(early.actions.is_empty());

    let resumed = supervisor.transition(&early.next, &summary(3, 250, None));
    assert_eq!(resumed.next.mode, MissionMode::Auto);
    assert_eq!(
        resumed.actions,
        vec![
            VehicleCommand::Servo(ServoCommand { channel: 9, pwm: 1100 }),
            VehicleCommand::SetMode(FlightMode::Auto),
        ]
    );
}

#[test]
fn test_json_and_yaml_parse_to_same_config() {
    let json = r#"{"heading": {"angular_speed": 40.0}, "link": {"max_attempts": 5}}"#;
    let yaml = "heading:\n  angular_speed: 40.0\nlink:\n  max_attempts: 5\n";
    let from_json = GarudaConfig::from_str(json).unwrap();
    let from_yaml = GarudaConfig::from_str(yaml).unwrap();
    assert_eq!(from_json, from_yaml);
    assert_eq!(from_json.heading.angular_speed, 40.0);
}
