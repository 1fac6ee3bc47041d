use garuda_cns::{normalize_error, EventOutcome, HeadingController, MissionSupervisor};
use garuda_core::config::{GarudaConfig, VisionConfig};
use garuda_core::error::LinkError;
use garuda_core::event::{OperatorCommand, OperatorRequest, PerceptionFault, SupervisorEvent};
use garuda_core::types::{
    DetectionSummary, FlightMode, FrameMeta, MissionMode, MissionState, NormalizedBox, RawDetection,
    ShapeCounts, VehicleTelemetry,
};
use garuda_eye::{CapturePolicy, DetectionAggregator, LabelTable};
use proptest::prelude::*;
use std::time::Duration;

fn circular_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

fn aggregator() -> DetectionAggregator {
    DetectionAggregator::new(
        LabelTable::parse("square\ntriangle\ncircle\n"),
        &VisionConfig::default(),
    )
}

fn meta(seq: u64) -> FrameMeta {
    FrameMeta {
        seq,
        captured_at: Duration::from_millis(seq * 40),
        width: 320,
        height: 240,
    }
}

/// Event shapes the state machine is exercised with
#[derive(Debug, Clone)]
enum EventSpec {
    Telemetry { armable: bool, armed: bool, heading: f32 },
    Detection { seq: u64, hotspot: bool },
    Absolute(f32),
    Relative(f32),
    Servo(u16),
    Resume,
    Status,
    Quit,
    LinkFailed,
    CameraFault,
    PerceptionEnded,
}

impl EventSpec {
    fn build(&self) -> SupervisorEvent {
        let operator = |command| SupervisorEvent::Operator(OperatorRequest::detached(command));
        match self {
            EventSpec::Telemetry { armable, armed, heading } => {
                SupervisorEvent::Telemetry(VehicleTelemetry {
                    heading: *heading,
                    armable: *armable,
                    armed: *armed,
                    mode: FlightMode::Guided,
                    system_status: "ACTIVE".to_string(),
                })
            }
            EventSpec::Detection { seq, hotspot } => {
                let mut summary = DetectionSummary::empty(meta(*seq));
                summary.hotspot_present = *hotspot;
                SupervisorEvent::Detection(summary)
            }
            EventSpec::Absolute(target) => operator(OperatorCommand::SetAbsoluteHeading(*target)),
            EventSpec::Relative(delta) => operator(OperatorCommand::SetRelativeHeading(*delta)),
            EventSpec::Servo(pwm) => operator(OperatorCommand::SetServo { channel: 9, pwm: *pwm }),
            EventSpec::Resume => operator(OperatorCommand::Resume),
            EventSpec::Status => operator(OperatorCommand::QueryStatus),
            EventSpec::Quit => operator(OperatorCommand::Quit),
            EventSpec::LinkFailed => {
                SupervisorEvent::LinkFailed(LinkError::Disconnected("serial".to_string()))
            }
            EventSpec::CameraFault => {
                SupervisorEvent::PerceptionFault(PerceptionFault::Camera("unplugged".to_string()))
            }
            EventSpec::PerceptionEnded => SupervisorEvent::PerceptionEnded,
        }
    }
}

fn event_spec() -> impl Strategy<Value = EventSpec> {
    prop_oneof![
        (any::<bool>(), any::<bool>(), 0.0f32..360.0)
            .prop_map(|(armable, armed, heading)| EventSpec::Telemetry { armable, armed, heading }),
        (0u64..50, any::<bool>()).prop_map(|(seq, hotspot)| EventSpec::Detection { seq, hotspot }),
        (-90.0f32..450.0).prop_map(EventSpec::Absolute),
        (-270.0f32..270.0).prop_map(EventSpec::Relative),
        (800u16..2200).prop_map(EventSpec::Servo),
        prop::sample::select(vec![EventSpec::Resume, EventSpec::Status, EventSpec::Quit]),
        prop::sample::select(vec![
            EventSpec::LinkFailed,
            EventSpec::CameraFault,
            EventSpec::PerceptionEnded,
        ]),
    ]
}

fn mission_state() -> impl Strategy<Value = MissionState> {
    (
        prop::sample::select(MissionMode::ALL.to_vec()),
        any::<bool>(),
        prop::option::of(0.0f32..360.0),
        prop::option::of(0u64..50),
    )
        .prop_map(|(mode, armed, heading, last_frame_seq)| MissionState {
            mode,
            armed,
            heading,
            last_frame_seq,
            ..MissionState::default()
        })
}

proptest! {
    #[test]
    fn test_heading_error_is_minimal_turn(current in 0.0f32..360.0, target in 0.0f32..=360.0) {
        let error = normalize_error(current, target);
        prop_assert!(error > -180.0 && error <= 180.0);
        prop_assert!(circular_distance(current + error, target) < 1e-2);
    }

    #[test]
    fn test_absolute_command_lands_on_target(current in 0.0f32..360.0, target in 0.0f32..=360.0) {
        let command = HeadingController::default().absolute(current, target).unwrap();
        prop_assert!(command.relative);
        prop_assert!(command.angle >= 0.0 && command.angle <= 180.0);
        prop_assert!(circular_distance(current + command.signed_delta(), target) < 1e-2);
    }

    #[test]
    fn test_relative_command_bounds(delta in -400.0f32..400.0) {
        let result = HeadingController::default().relative(delta);
        if (-180.0..=180.0).contains(&delta) {
            let command = result.unwrap();
            prop_assert!((command.signed_delta() - delta).abs() < 1e-4);
        } else {
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn test_only_confident_detections_survive(
        raw in prop::collection::vec((0i64..5, -0.5f32..1.5), 0..20)
    ) {
        let detections: Vec<RawDetection> = raw
            .iter()
            .map(|&(class_index, confidence)| RawDetection {
                class_index,
                confidence,
                bbox: NormalizedBox([0.1, 0.1, 0.5, 0.5]),
            })
            .collect();
        let summary = aggregator().aggregate(meta(1), &detections);

        for det in &summary.detections {
            prop_assert!(det.confidence > 0.9 && det.confidence <= 1.0);
        }
        let confident = detections
            .iter()
            .filter(|d| d.confidence > 0.9 && d.confidence <= 1.0)
            .count();
        prop_assert_eq!(summary.detections.len() + summary.dropped_labels as usize, confident);
        prop_assert_eq!(summary.hotspot_present, summary.has_label("circle"));
    }

    #[test]
    fn test_capture_policy_is_pure(
        squares in 0u32..4,
        triangles in 0u32..4,
        hotspot in any::<bool>(),
        enabled in any::<bool>()
    ) {
        let mut summary = DetectionSummary::empty(meta(7));
        summary.counts = ShapeCounts { squares, triangles };
        summary.hotspot_present = hotspot;
        let policy = CapturePolicy::new(enabled);

        let first = policy.evaluate(&summary);
        prop_assert_eq!(&first, &policy.evaluate(&summary));

        let expected = if enabled {
            usize::from(squares > 0 && triangles > 0) + usize::from(hotspot)
        } else {
            0
        };
        prop_assert_eq!(first.len(), expected);
    }

    #[test]
    fn test_transition_is_total(state in mission_state(), spec in event_spec()) {
        let supervisor = MissionSupervisor::new(&GarudaConfig::default());
        let transition = supervisor.transition(&state, &spec.build());

        match &transition.outcome {
            EventOutcome::Rejected(_) | EventOutcome::OutOfOrder(_) | EventOutcome::Status => {
                prop_assert_eq!(&transition.next, &state);
                prop_assert!(transition.actions.is_empty());
            }
            EventOutcome::Terminated(_) => {
                prop_assert_eq!(transition.next.mode, MissionMode::Terminated);
            }
            EventOutcome::Applied | EventOutcome::Ignored => {}
        }
    }

    #[test]
    fn test_terminated_is_absorbing(
        specs in prop::collection::vec(event_spec(), 1..20)
    ) {
        let supervisor = MissionSupervisor::new(&GarudaConfig::default());
        let state = MissionState {
            mode: MissionMode::Terminated,
            armed: true,
            ..MissionState::default()
        };

        for spec in &specs {
            let transition = supervisor.transition(&state, &spec.build());
            prop_assert_eq!(&transition.next, &state);
            prop_assert!(transition.actions.is_empty());
        }
    }

    #[test]
    fn test_stale_frames_never_apply(
        mode in prop::sample::select(vec![
            MissionMode::Auto,
            MissionMode::Halted,
            MissionMode::ManualOverride,
        ]),
        last in 1u64..100,
        back in 0u64..100
    ) {
        let supervisor = MissionSupervisor::new(&GarudaConfig::default());
        let state = MissionState {
            mode,
            armed: true,
            last_frame_seq: Some(last),
            ..MissionState::default()
        };
        let mut summary = DetectionSummary::empty(meta(last.saturating_sub(back)));
        summary.hotspot_present = true;

        let transition = supervisor.transition(&state, &SupervisorEvent::Detection(summary));
        prop_assert!(
            matches!(transition.outcome, EventOutcome::OutOfOrder(_)),
            "outcome was {:?}",
            transition.outcome
        );
        prop_assert_eq!(transition.next, state);
    }
}
