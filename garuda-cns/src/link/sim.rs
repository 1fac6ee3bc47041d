//! In-process simulated vehicle
//!
//! Applies commands to a telemetry model and can be scripted to fail. Clones
//! share state, so a test can keep one clone while the dispatcher owns another.

use super::{LinkAck, LinkFault, VehicleLink};
use async_trait::async_trait;
use garuda_core::types::{
    CommandChannel, FlightMode, HeadingCommand, ServoCommand, VehicleCommand, VehicleTelemetry,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Debug)]
struct SimState {
    telemetry: VehicleTelemetry,
    acknowledged: Vec<VehicleCommand>,
    attempts: Vec<VehicleCommand>,
    servos: HashMap<u8, u16>,
    command_faults: HashMap<CommandChannel, VecDeque<LinkFault>>,
    telemetry_faults: VecDeque<LinkFault>,
    reject_arm: Option<String>,
    latency: Duration,
    closed: bool,
}

#[derive(Debug, Clone)]
pub struct SimulatedVehicle {
    state: Arc<Mutex<SimState>>,
    gate: Option<Arc<Notify>>,
}

impl SimulatedVehicle {
    /// Disarmed, armable vehicle in GUIDED facing `heading`
    pub fn new(heading: f32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                telemetry: VehicleTelemetry {
                    heading: heading.rem_euclid(360.0),
                    armable: true,
                    armed: false,
                    mode: FlightMode::Guided,
                    system_status: "STANDBY".to_string(),
                },
                acknowledged: Vec::new(),
                attempts: Vec::new(),
                servos: HashMap::new(),
                command_faults: HashMap::new(),
                telemetry_faults: VecDeque::new(),
                reject_arm: None,
                latency: Duration::ZERO,
                closed: false,
            })),
            gate: None,
        }
    }

    /// Delay every command answer by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Change the command latency for every clone
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Hold every command until the returned gate is notified once for it
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn set_armable(&self, armable: bool) {
        self.state.lock().telemetry.armable = armable;
    }

    pub fn set_heading(&self, heading: f32) {
        self.state.lock().telemetry.heading = heading.rem_euclid(360.0);
    }

    /// Fail the next `times` commands on `channel` with `fault`
    pub fn fail_commands(&self, channel: CommandChannel, fault: LinkFault, times: usize) {
        let mut state = self.state.lock();
        let queue = state.command_faults.entry(channel).or_default();
        queue.extend(std::iter::repeat(fault).take(times));
    }

    pub fn fail_telemetry(&self, fault: LinkFault, times: usize) {
        let mut state = self.state.lock();
        state.telemetry_faults.extend(std::iter::repeat(fault).take(times));
    }

    /// Refuse every arm request, as a failed pre-arm check would
    pub fn reject_arm(&self, reason: impl Into<String>) {
        self.state.lock().reject_arm = Some(reason.into());
    }

    /// Commands the vehicle acknowledged, in order
    pub fn acknowledged(&self) -> Vec<VehicleCommand> {
        self.state.lock().acknowledged.clone()
    }

    /// Every command attempt, including faulted ones
    pub fn attempts(&self) -> Vec<VehicleCommand> {
        self.state.lock().attempts.clone()
    }

    pub fn snapshot(&self) -> VehicleTelemetry {
        self.state.lock().telemetry.clone()
    }

    pub fn servo(&self, channel: u8) -> Option<u16> {
        self.state.lock().servos.get(&channel).copied()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    async fn wait_turn(&self) {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    async fn apply(&self, command: VehicleCommand) -> Result<LinkAck, LinkFault> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(LinkFault::Disconnected("link closed".to_string()));
            }
            state.attempts.push(command.clone());
        }

        self.wait_turn().await;

        let mut state = self.state.lock();
        if let Some(fault) = state
            .command_faults
            .get_mut(&command.channel())
            .and_then(VecDeque::pop_front)
        {
            debug!(command = %command, fault = %fault, "simulated fault");
            return Err(fault);
        }

        match &command {
            VehicleCommand::SetMode(mode) => state.telemetry.mode = mode.clone(),
            VehicleCommand::Arm => {
                if let Some(reason) = &state.reject_arm {
                    return Err(LinkFault::Rejected(reason.clone()));
                }
                if !state.telemetry.armable {
                    return Err(LinkFault::Rejected("vehicle not armable".to_string()));
                }
                state.telemetry.armed = true;
                state.telemetry.system_status = "ACTIVE".to_string();
            }
            VehicleCommand::Heading(heading) => {
                let base = if heading.relative { state.telemetry.heading } else { 0.0 };
                state.telemetry.heading = (base + heading.signed_delta()).rem_euclid(360.0);
            }
            VehicleCommand::Servo(servo) => {
                state.servos.insert(servo.channel, servo.pwm);
            }
        }
        debug!(command = %command, "simulated vehicle acknowledged");
        state.acknowledged.push(command);
        Ok(LinkAck::default())
    }
}

#[async_trait]
impl VehicleLink for SimulatedVehicle {
    async fn send_mode(&self, mode: &FlightMode) -> Result<LinkAck, LinkFault> {
        self.apply(VehicleCommand::SetMode(mode.clone())).await
    }

    async fn arm(&self) -> Result<LinkAck, LinkFault> {
        self.apply(VehicleCommand::Arm).await
    }

    async fn send_heading(&self, command: &HeadingCommand) -> Result<LinkAck, LinkFault> {
        self.apply(VehicleCommand::Heading(*command)).await
    }

    async fn send_servo(&self, command: &ServoCommand) -> Result<LinkAck, LinkFault> {
        self.apply(VehicleCommand::Servo(*command)).await
    }

    async fn telemetry(&self) -> Result<VehicleTelemetry, LinkFault> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LinkFault::Disconnected("link closed".to_string()));
        }
        if let Some(fault) = state.telemetry_faults.pop_front() {
            return Err(fault);
        }
        Ok(state.telemetry.clone())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            info!(acknowledged = state.acknowledged.len(), "simulated vehicle link closed");
            state.closed = true;
        }
    }
}
