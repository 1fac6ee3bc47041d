//! Mission runtime driven against the simulated vehicle

use garuda_cns::{
    event_channel, CnsError, CommandDispatcher, LinkFault, MissionExit, MissionReport,
    MissionRuntime, OperatorHandle, SimulatedVehicle,
};
use garuda_core::config::GarudaConfig;
use garuda_core::error::{ErrorKind, ValidationError};
use garuda_core::event::SupervisorEvent;
use garuda_core::shutdown::{self, ShutdownTrigger};
use garuda_core::types::{
    CommandChannel, DetectionSummary, FlightMode, FrameMeta, MissionMode, MissionState,
    ServoCommand, VehicleCommand,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

struct Mission {
    vehicle: SimulatedVehicle,
    events: mpsc::Sender<SupervisorEvent>,
    operator: OperatorHandle,
    snapshots: watch::Receiver<MissionState>,
    trigger: ShutdownTrigger,
    handle: JoinHandle<MissionReport>,
}

fn config() -> GarudaConfig {
    let mut config = GarudaConfig::default();
    config.link.telemetry_interval_ms = 10;
    config.link.command_timeout_ms = 500;
    config
}

fn start(vehicle: SimulatedVehicle) -> Mission {
    start_with(vehicle, config())
}

fn start_with(vehicle: SimulatedVehicle, config: GarudaConfig) -> Mission {
    let dispatcher = CommandDispatcher::from_config(Arc::new(vehicle.clone()), &config.link);
    let runtime = MissionRuntime::new(&config, dispatcher);
    let snapshots = runtime.subscribe();
    let (tx, rx) = event_channel(config.mission.event_queue_size);
    let (trigger, signal) = shutdown::channel();
    let handle = tokio::spawn(runtime.run(rx, signal));
    Mission {
        vehicle,
        operator: OperatorHandle::new(tx.clone()),
        events: tx,
        snapshots,
        trigger,
        handle,
    }
}

async fn wait_for_mode(
    snapshots: &mut watch::Receiver<MissionState>,
    mode: MissionMode,
) -> MissionState {
    tokio::time::timeout(Duration::from_secs(5), snapshots.wait_for(|s| s.mode == mode))
        .await
        .expect("mode not reached in time")
        .expect("runtime stopped")
        .clone()
}

fn frame(seq: u64, hotspot: bool) -> SupervisorEvent {
    let mut summary = DetectionSummary::empty(FrameMeta {
        seq,
        captured_at: Duration::from_millis(seq * 33),
        width: 640,
        height: 480,
    });
    summary.hotspot_present = hotspot;
    SupervisorEvent::Detection(summary)
}

fn release() -> VehicleCommand {
    VehicleCommand::Servo(ServoCommand { channel: 9, pwm: 1900 })
}

fn releases(vehicle: &SimulatedVehicle) -> usize {
    vehicle.acknowledged().iter().filter(|c| **c == release()).count()
}

#[tokio::test]
async fn test_arms_and_enters_auto() {
    let mut mission = start(SimulatedVehicle::new(120.0));
    let state = wait_for_mode(&mut mission.snapshots, MissionMode::Auto).await;
    assert!(state.armed);
    assert_eq!(mission.vehicle.snapshot().mode, FlightMode::Auto);

    let acknowledged = mission.vehicle.acknowledged();
    assert_eq!(
        acknowledged,
        vec![
            VehicleCommand::SetMode(FlightMode::Guided),
            VehicleCommand::Arm,
            VehicleCommand::SetMode(FlightMode::Auto),
        ]
    );

    mission.trigger.trigger();
    let report = mission.handle.await.unwrap();
    assert_eq!(report.exit, MissionExit::Shutdown);
    assert!(mission.vehicle.is_closed());
}

#[tokio::test]
async fn test_hotspot_halts_with_single_release() {
    let mut mission = start(SimulatedVehicle::new(0.0));
    wait_for_mode(&mut mission.snapshots, MissionMode::Auto).await;

    mission.events.send(frame(1, true)).await.unwrap();
    let state = wait_for_mode(&mut mission.snapshots, MissionMode::Halted).await;
    assert!(state.halted_at.is_some());

    // Further hotspot frames while halted must not fire the release again
    mission.events.send(frame(2, true)).await.unwrap();
    let status = mission.operator.query_status().await.unwrap();
    assert_eq!(status.mode, MissionMode::Halted);

    let acknowledged = mission.vehicle.acknowledged();
    assert_eq!(releases(&mission.vehicle), 1);
    let pos = acknowledged.iter().position(|c| *c == release()).unwrap();
    assert_eq!(acknowledged[pos + 1], VehicleCommand::SetMode(FlightMode::Guided));

    // Operator confirms, the next clear frame resumes
    mission.operator.resume().await.unwrap();
    mission.events.send(frame(3, false)).await.unwrap();
    wait_for_mode(&mut mission.snapshots, MissionMode::Auto).await;
    assert_eq!(mission.vehicle.servo(9), Some(1100));

    mission.operator.quit().await.unwrap();
    let report = mission.handle.await.unwrap();
    assert_eq!(report.exit, MissionExit::Terminated);
    assert_eq!(report.termination.unwrap().kind, None);
    assert_eq!(mission.vehicle.snapshot().mode, FlightMode::Guided);
}

#[tokio::test]
async fn test_rejected_safe_mode_keeps_halt_and_is_resent() {
    let mut mission = start(SimulatedVehicle::new(0.0));
    wait_for_mode(&mut mission.snapshots, MissionMode::Auto).await;
    mission.vehicle.fail_commands(
        CommandChannel::Mode,
        LinkFault::Rejected("mode change locked".to_string()),
        1,
    );

    mission.events.send(frame(1, true)).await.unwrap();
    wait_for_mode(&mut mission.snapshots, MissionMode::Halted).await;
    mission.events.send(frame(2, true)).await.unwrap();
    let status = mission.operator.query_status().await.unwrap();
    assert_eq!(status.mode, MissionMode::Halted);
    assert_eq!(status.last_frame_seq, Some(2));

    // Released once; only the mode change went out a second time
    assert_eq!(releases(&mission.vehicle), 1);
    let guided = VehicleCommand::SetMode(FlightMode::Guided);
    let mode_attempts = mission.vehicle.attempts().iter().filter(|c| **c == guided).count();
    assert_eq!(mode_attempts, 3);
    assert_eq!(mission.vehicle.snapshot().mode, FlightMode::Guided);

    mission.trigger.trigger();
    let report = mission.handle.await.unwrap();
    assert_eq!(report.final_state.mode, MissionMode::Halted);
    assert_eq!(releases(&mission.vehicle), 1);
}

#[tokio::test]
async fn test_status_answered_while_halt_in_flight() {
    let mut config = config();
    config.link.command_timeout_ms = 5_000;
    let mut mission = start_with(SimulatedVehicle::new(0.0), config);
    wait_for_mode(&mut mission.snapshots, MissionMode::Auto).await;
    mission.vehicle.set_latency(Duration::from_millis(800));

    mission.events.send(frame(1, true)).await.unwrap();
    let asked = Instant::now();
    let status = mission.operator.query_status().await.unwrap();
    assert!(asked.elapsed() < Duration::from_millis(400));
    // Not committed until the vehicle acknowledges the release
    assert_eq!(status.mode, MissionMode::Auto);

    let state = wait_for_mode(&mut mission.snapshots, MissionMode::Halted).await;
    assert_eq!(state.last_command, Some(release()));

    mission.trigger.trigger();
    let report = mission.handle.await.unwrap();
    assert_eq!(report.exit, MissionExit::Shutdown);
    assert_eq!(releases(&mission.vehicle), 1);
    assert_eq!(mission.vehicle.snapshot().mode, FlightMode::Guided);
}

#[tokio::test]
async fn test_mode_change_timeouts_terminate() {
    let vehicle = SimulatedVehicle::new(0.0);
    vehicle.fail_commands(CommandChannel::Mode, LinkFault::Timeout, 3);
    let mission = start(vehicle);

    let report = tokio::time::timeout(Duration::from_secs(5), mission.handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.exit, MissionExit::Terminated);
    assert_eq!(report.final_state.mode, MissionMode::Terminated);
    let termination = report.termination.unwrap();
    assert_eq!(termination.kind, Some(ErrorKind::Link));
    assert!(termination.reason.contains("SetMode(GUIDED)"));
    assert_eq!(mission.vehicle.attempts().len(), 3);
    assert!(mission.vehicle.is_closed());
}

#[tokio::test]
async fn test_operator_rejected_before_arming() {
    let vehicle = SimulatedVehicle::new(0.0);
    vehicle.set_armable(false);
    let mission = start(vehicle);

    let err = mission.operator.set_relative_heading(30.0).await.unwrap_err();
    assert!(matches!(err, CnsError::Validation(ValidationError::NotArmed(_))));
    let status = mission.operator.query_status().await.unwrap();
    assert_eq!(status.mode, MissionMode::Init);
    assert!(mission.vehicle.acknowledged().is_empty());

    mission.operator.quit().await.unwrap();
    let report = mission.handle.await.unwrap();
    assert_eq!(report.rejected, 1);
}

#[tokio::test]
async fn test_manual_override_and_resume() {
    let mut mission = start(SimulatedVehicle::new(350.0));
    wait_for_mode(&mut mission.snapshots, MissionMode::Auto).await;

    let state = mission.operator.set_absolute_heading(10.0).await.unwrap();
    assert_eq!(state.mode, MissionMode::ManualOverride);
    assert!((mission.vehicle.snapshot().heading - 10.0).abs() < 1e-3);

    let err = mission.operator.set_absolute_heading(400.0).await.unwrap_err();
    assert!(matches!(
        err,
        CnsError::Validation(ValidationError::AbsoluteHeadingOutOfRange(_))
    ));

    let state = mission.operator.resume().await.unwrap();
    assert_eq!(state.mode, MissionMode::Auto);
    assert_eq!(mission.vehicle.snapshot().mode, FlightMode::Auto);

    mission.trigger.trigger();
    mission.handle.await.unwrap();
}

#[tokio::test]
async fn test_out_of_order_summary_counted() {
    let mut mission = start(SimulatedVehicle::new(0.0));
    wait_for_mode(&mut mission.snapshots, MissionMode::Auto).await;

    mission.events.send(frame(5, false)).await.unwrap();
    mission.events.send(frame(3, true)).await.unwrap();
    let status = mission.operator.query_status().await.unwrap();
    assert_eq!(status.mode, MissionMode::Auto);
    assert_eq!(status.last_frame_seq, Some(5));

    mission.trigger.trigger();
    let report = mission.handle.await.unwrap();
    assert_eq!(report.out_of_order, 1);
}

#[tokio::test]
async fn test_perception_fault_terminates() {
    let mut mission = start(SimulatedVehicle::new(0.0));
    wait_for_mode(&mut mission.snapshots, MissionMode::Auto).await;

    mission
        .events
        .send(SupervisorEvent::PerceptionFault(
            garuda_core::event::PerceptionFault::Camera("lens cap".to_string()),
        ))
        .await
        .unwrap();
    let report = mission.handle.await.unwrap();
    assert_eq!(report.termination.as_ref().unwrap().kind, Some(ErrorKind::Inference));
    assert_eq!(mission.vehicle.snapshot().mode, FlightMode::Guided);
    assert!(report.to_json().unwrap().contains("Terminated"));
}
