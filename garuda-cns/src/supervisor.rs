//! Mission state machine
//!
//! [`MissionSupervisor::transition`] is a pure function of the current state
//! and one event. It never talks to the vehicle; the runtime executes the
//! returned actions and decides whether `next` is committed.

use crate::heading::{normalize_error, HeadingController};
use garuda_core::config::{GarudaConfig, ResumePolicy, ServoConfig};
use garuda_core::error::{ErrorKind, OrderingError, ValidationError};
use garuda_core::event::{OperatorCommand, PerceptionFault, SupervisorEvent};
use garuda_core::types::{
    DetectionSummary, FlightMode, MissionMode, MissionState, ServoCommand, VehicleCommand,
    VehicleTelemetry,
};
use serde::Serialize;
use std::time::Duration;

/// How the runtime treats `next` when actions fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommitPolicy {
    /// Commit only if every action is acknowledged, in order
    AllOrNothing,
    /// Commit regardless; failures are logged
    BestEffort,
    /// Commit as soon as the action at this index is acknowledged. A failure
    /// before that point aborts like `AllOrNothing`; a rejection after it is
    /// re-sent on its own and never reverts the state.
    CommitAfter(usize),
    /// Commit now and hand the actions to the dispatcher without waiting. A
    /// newer command on the same channel replaces one not yet sent.
    Queued,
}

/// Why the mission ended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Termination {
    /// `None` for an operator quit
    pub kind: Option<ErrorKind>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Applied,
    /// Valid event with no effect in the current mode
    Ignored,
    Status,
    Rejected(ValidationError),
    OutOfOrder(OrderingError),
    Terminated(Termination),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: MissionState,
    pub actions: Vec<VehicleCommand>,
    pub commit: CommitPolicy,
    pub outcome: EventOutcome,
}

impl Transition {
    fn unchanged(state: &MissionState, outcome: EventOutcome) -> Self {
        Self {
            next: state.clone(),
            actions: Vec::new(),
            commit: CommitPolicy::BestEffort,
            outcome,
        }
    }

    fn to(next: MissionState, actions: Vec<VehicleCommand>, commit: CommitPolicy) -> Self {
        Self {
            next,
            actions,
            commit,
            outcome: EventOutcome::Applied,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MissionSupervisor {
    heading: HeadingController,
    servo: ServoConfig,
    hotspot_label: String,
    stop_classes: Vec<String>,
    resume: ResumePolicy,
    safe_mode: FlightMode,
}

impl MissionSupervisor {
    pub fn new(config: &GarudaConfig) -> Self {
        Self {
            heading: HeadingController::new(config.heading.angular_speed),
            servo: config.servo.clone(),
            hotspot_label: config.vision.labels.hotspot.clone(),
            stop_classes: config.mission.stop_classes.clone(),
            resume: config.mission.resume_policy,
            safe_mode: config.mission.safe_mode.clone(),
        }
    }

    pub fn heading_controller(&self) -> &HeadingController {
        &self.heading
    }

    /// Interrupt condition for one frame: the hotspot or any stop class
    pub fn is_interrupt(&self, summary: &DetectionSummary) -> bool {
        summary.hotspot_present
            || summary.has_label(&self.hotspot_label)
            || self.stop_classes.iter().any(|class| summary.has_label(class))
    }

    pub fn transition(&self, state: &MissionState, event: &SupervisorEvent) -> Transition {
        if state.mode.is_terminal() {
            let outcome = match event {
                SupervisorEvent::Operator(request) => match request.command {
                    OperatorCommand::QueryStatus => EventOutcome::Status,
                    _ => EventOutcome::Rejected(ValidationError::Terminated),
                },
                _ => EventOutcome::Ignored,
            };
            return Transition::unchanged(state, outcome);
        }

        match event {
            SupervisorEvent::Telemetry(telemetry) => self.on_telemetry(state, telemetry),
            SupervisorEvent::Detection(summary) => self.on_detection(state, summary),
            SupervisorEvent::Operator(request) => self.on_operator(state, &request.command),
            SupervisorEvent::LinkFailed(err) => self.terminate(
                state,
                Some(ErrorKind::Link),
                err.to_string(),
                false,
            ),
            // Camera faults share the inference kind; the reason names the camera
            SupervisorEvent::PerceptionFault(fault) => {
                let reason = match fault {
                    PerceptionFault::Inference(err) => err.to_string(),
                    PerceptionFault::Camera(reason) => format!("camera: {}", reason),
                };
                self.terminate(state, Some(ErrorKind::Inference), reason, true)
            }
            SupervisorEvent::PerceptionEnded => Transition::unchanged(state, EventOutcome::Ignored),
        }
    }

    fn on_telemetry(&self, state: &MissionState, telemetry: &VehicleTelemetry) -> Transition {
        let mut next = state.clone();
        next.heading = Some(telemetry.heading);
        next.armed = telemetry.armed;

        match state.mode {
            MissionMode::Init if telemetry.armable => {
                next.mode = MissionMode::Arming;
                Transition::to(
                    next,
                    vec![VehicleCommand::SetMode(FlightMode::Guided), VehicleCommand::Arm],
                    CommitPolicy::AllOrNothing,
                )
            }
            MissionMode::Arming if telemetry.armed => {
                next.mode = MissionMode::Auto;
                Transition::to(
                    next,
                    vec![VehicleCommand::SetMode(FlightMode::Auto)],
                    CommitPolicy::AllOrNothing,
                )
            }
            _ => Transition::to(next, Vec::new(), CommitPolicy::BestEffort),
        }
    }

    fn on_detection(&self, state: &MissionState, summary: &DetectionSummary) -> Transition {
        if let Some(last) = state.last_frame_seq {
            if summary.frame_seq <= last {
                return Transition::unchanged(
                    state,
                    EventOutcome::OutOfOrder(OrderingError {
                        last,
                        got: summary.frame_seq,
                    }),
                );
            }
        }

        let mut next = state.clone();
        next.last_frame_seq = Some(summary.frame_seq);
        let interrupt = self.is_interrupt(summary);

        match state.mode {
            MissionMode::Auto if interrupt => {
                next.mode = MissionMode::Halted;
                next.halted_at = Some(summary.captured_at);
                next.resume_requested = false;
                // The release cannot be taken back, so it alone decides the commit
                Transition::to(
                    next,
                    vec![
                        self.servo_command(self.servo.release_pwm),
                        VehicleCommand::SetMode(self.safe_mode.clone()),
                    ],
                    CommitPolicy::CommitAfter(0),
                )
            }
            MissionMode::Halted if interrupt => {
                // Clear time counts from the latest interrupting frame
                next.halted_at = Some(summary.captured_at);
                Transition::to(next, Vec::new(), CommitPolicy::BestEffort)
            }
            MissionMode::Halted if self.may_resume(state, summary.captured_at) => {
                next.mode = MissionMode::Auto;
                next.halted_at = None;
                next.resume_requested = false;
                Transition::to(
                    next,
                    vec![
                        self.servo_command(self.servo.reset_pwm),
                        VehicleCommand::SetMode(FlightMode::Auto),
                    ],
                    CommitPolicy::AllOrNothing,
                )
            }
            _ => Transition::to(next, Vec::new(), CommitPolicy::BestEffort),
        }
    }

    fn may_resume(&self, state: &MissionState, now: Duration) -> bool {
        if state.resume_requested {
            return true;
        }
        match (self.resume, state.halted_at) {
            (ResumePolicy::AutoAfter { clear_for_ms }, Some(halted_at)) => {
                now.saturating_sub(halted_at) >= Duration::from_millis(clear_for_ms)
            }
            _ => false,
        }
    }

    fn on_operator(&self, state: &MissionState, command: &OperatorCommand) -> Transition {
        let manual = match *command {
            OperatorCommand::QueryStatus => {
                return Transition::unchanged(state, EventOutcome::Status)
            }
            OperatorCommand::Quit => {
                return self.terminate(state, None, "operator quit".to_string(), true)
            }
            OperatorCommand::Resume => return self.on_resume(state),
            _ if !state.armed => Err(ValidationError::NotArmed(command.name().to_string())),
            OperatorCommand::SetAbsoluteHeading(target) => self.absolute_heading(state, target),
            OperatorCommand::SetRelativeHeading(delta) => self
                .heading
                .relative(delta)
                .map(|heading| (VehicleCommand::Heading(heading), Some(delta))),
            OperatorCommand::SetServo { channel, pwm } => self.servo_override(channel, pwm),
        };

        match manual {
            Ok((action, heading_error)) => self.enter_override(state, action, heading_error),
            Err(reason) => Transition::unchanged(state, EventOutcome::Rejected(reason)),
        }
    }

    fn on_resume(&self, state: &MissionState) -> Transition {
        match state.mode {
            MissionMode::Halted => {
                let mut next = state.clone();
                next.resume_requested = true;
                Transition::to(next, Vec::new(), CommitPolicy::BestEffort)
            }
            MissionMode::ManualOverride => {
                let mut next = state.clone();
                next.mode = MissionMode::Auto;
                Transition::to(
                    next,
                    vec![VehicleCommand::SetMode(FlightMode::Auto)],
                    CommitPolicy::AllOrNothing,
                )
            }
            _ => Transition::unchanged(state, EventOutcome::Ignored),
        }
    }

    fn absolute_heading(
        &self,
        state: &MissionState,
        target: f32,
    ) -> Result<(VehicleCommand, Option<f32>), ValidationError> {
        let current = state.heading.ok_or(ValidationError::HeadingUnknown)?;
        let heading = self.heading.absolute(current, target)?;
        Ok((
            VehicleCommand::Heading(heading),
            Some(normalize_error(current, target)),
        ))
    }

    fn servo_override(
        &self,
        channel: u8,
        pwm: u16,
    ) -> Result<(VehicleCommand, Option<f32>), ValidationError> {
        if pwm < self.servo.min_pwm || pwm > self.servo.max_pwm {
            return Err(ValidationError::PwmOutOfRange {
                pwm,
                min: self.servo.min_pwm,
                max: self.servo.max_pwm,
            });
        }
        Ok((VehicleCommand::Servo(ServoCommand { channel, pwm }), None))
    }

    /// Validated manual command; leaving AUTO switches the vehicle to GUIDED first
    fn enter_override(
        &self,
        state: &MissionState,
        action: VehicleCommand,
        heading_error: Option<f32>,
    ) -> Transition {
        let mut next = state.clone();
        next.mode = MissionMode::ManualOverride;
        if heading_error.is_some() {
            next.last_heading_error = heading_error;
        }
        if state.mode == MissionMode::ManualOverride {
            return Transition::to(next, vec![action], CommitPolicy::Queued);
        }

        let mut actions = Vec::with_capacity(2);
        if state.mode == MissionMode::Auto {
            actions.push(VehicleCommand::SetMode(FlightMode::Guided));
        }
        actions.push(action);
        Transition::to(next, actions, CommitPolicy::AllOrNothing)
    }

    fn terminate(
        &self,
        state: &MissionState,
        kind: Option<ErrorKind>,
        reason: String,
        stop_vehicle: bool,
    ) -> Transition {
        let mut next = state.clone();
        next.mode = MissionMode::Terminated;
        let actions = if stop_vehicle && state.armed {
            vec![VehicleCommand::SetMode(self.safe_mode.clone())]
        } else {
            Vec::new()
        };
        Transition {
            next,
            actions,
            commit: CommitPolicy::BestEffort,
            outcome: EventOutcome::Terminated(Termination { kind, reason }),
        }
    }

    fn servo_command(&self, pwm: u16) -> VehicleCommand {
        VehicleCommand::Servo(ServoCommand {
            channel: self.servo.release_channel,
            pwm,
        })
    }
}
