//! Supervisor runtime
//!
//! The async task that owns [`MissionState`]. It consumes [`SupervisorEvent`]s
//! from one bounded channel, polls telemetry on an interval, executes the
//! supervisor's decisions through the [`CommandDispatcher`], and publishes every
//! committed state on a `watch` channel.
//!
//! The loop never waits on the vehicle. A transition whose commit depends on
//! acknowledgements is held as the pending transition and advanced as its
//! completions arrive; events that depend on its outcome are deferred until it
//! settles, while status queries and quit are answered at once.

use crate::dispatcher::{CommandDispatcher, Completion, DispatchStats, Ticket};
use crate::error::DispatchError;
use crate::supervisor::{CommitPolicy, EventOutcome, MissionSupervisor, Termination, Transition};
use futures::future::BoxFuture;
use garuda_core::config::GarudaConfig;
use garuda_core::error::{ErrorKind, LinkError};
use garuda_core::event::{OperatorCommand, OperatorReply, SupervisorEvent};
use garuda_core::shutdown::ShutdownSignal;
use garuda_core::types::{MissionState, VehicleCommand, VehicleTelemetry};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

type TelemetryRead = BoxFuture<'static, Result<VehicleTelemetry, DispatchError>>;

/// Bounded channel feeding one supervisor
pub fn event_channel(
    capacity: usize,
) -> (mpsc::Sender<SupervisorEvent>, mpsc::Receiver<SupervisorEvent>) {
    mpsc::channel(capacity.max(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MissionExit {
    Terminated,
    Shutdown,
    /// Every event sender was dropped
    EventsClosed,
}

/// Summary returned when the runtime stops
#[derive(Debug, Clone, Serialize)]
pub struct MissionReport {
    pub exit: MissionExit,
    pub termination: Option<Termination>,
    pub final_state: MissionState,
    pub dispatch: DispatchStats,
    pub events: u64,
    pub rejected: u64,
    pub out_of_order: u64,
}

impl MissionReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

enum Step {
    Shutdown,
    EventsClosed,
    Event(SupervisorEvent),
    Completion(Option<Completion>),
    Tick,
    Telemetry(Result<VehicleTelemetry, DispatchError>),
}

/// A transition whose actions are still being delivered, one at a time
struct PendingTransition {
    next: MissionState,
    actions: VecDeque<VehicleCommand>,
    /// Index of the action whose acknowledgement commits `next`
    commit_at: usize,
    acknowledged: usize,
    waiting: Option<Ticket>,
    committed: bool,
    resent: bool,
    reply: Option<oneshot::Sender<OperatorReply>>,
}

pub struct MissionRuntime {
    supervisor: MissionSupervisor,
    dispatcher: CommandDispatcher,
    state: MissionState,
    snapshots: watch::Sender<MissionState>,
    telemetry_interval: Duration,
    started: Instant,
    pending: Option<PendingTransition>,
    deferred: VecDeque<SupervisorEvent>,
    deferred_limit: usize,
    events: u64,
    rejected: u64,
    out_of_order: u64,
}

impl MissionRuntime {
    pub fn new(config: &GarudaConfig, dispatcher: CommandDispatcher) -> Self {
        let state = MissionState::default();
        let (snapshots, _) = watch::channel(state.clone());
        Self {
            supervisor: MissionSupervisor::new(config),
            dispatcher,
            state,
            snapshots,
            telemetry_interval: config.link.telemetry_interval(),
            started: Instant::now(),
            pending: None,
            deferred: VecDeque::new(),
            deferred_limit: config.mission.event_queue_size.max(1),
            events: 0,
            rejected: 0,
            out_of_order: 0,
        }
    }

    /// Committed-state snapshots
    pub fn subscribe(&self) -> watch::Receiver<MissionState> {
        self.snapshots.subscribe()
    }

    pub fn state(&self) -> &MissionState {
        &self.state
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SupervisorEvent>,
        mut shutdown: ShutdownSignal,
    ) -> MissionReport {
        let mut ticker = tokio::time::interval(self.telemetry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut telemetry: Option<TelemetryRead> = None;
        info!(mode = %self.state.mode, "mission supervisor started");

        let mut termination = None;
        let exit = loop {
            if shutdown.is_shutdown() {
                break MissionExit::Shutdown;
            }

            let has_work = self.dispatcher.has_work();
            let reading = telemetry.is_some();
            let step = tokio::select! {
                biased;
                _ = shutdown.wait() => Step::Shutdown,
                done = self.dispatcher.next_completion(), if has_work => Step::Completion(done),
                read = outstanding(&mut telemetry), if reading => Step::Telemetry(read),
                event = events.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::EventsClosed,
                },
                _ = ticker.tick(), if !reading => Step::Tick,
            };

            let ended = match step {
                Step::Shutdown => break MissionExit::Shutdown,
                Step::EventsClosed => break MissionExit::EventsClosed,
                Step::Event(event) => self.handle(event),
                Step::Completion(Some(done)) => self.on_completion(done),
                Step::Completion(None) => None,
                Step::Tick => {
                    telemetry = Some(self.dispatcher.telemetry());
                    None
                }
                Step::Telemetry(read) => {
                    telemetry = None;
                    self.on_telemetry(read)
                }
            };
            if let Some(ended) = ended {
                termination = Some(ended);
                break MissionExit::Terminated;
            }
        };

        self.finish(exit, termination).await
    }

    fn handle(&mut self, event: SupervisorEvent) -> Option<Termination> {
        self.events += 1;
        if self.pending.is_none() {
            return self.process(event);
        }

        let defer = match &event {
            SupervisorEvent::Telemetry(telemetry) => {
                self.refresh(telemetry);
                return None;
            }
            SupervisorEvent::Detection(_) => true,
            SupervisorEvent::Operator(request) => !matches!(
                request.command,
                OperatorCommand::QueryStatus | OperatorCommand::Quit
            ),
            _ => false,
        };
        if defer {
            self.defer(event);
            return None;
        }
        self.process(event)
    }

    fn process(&mut self, event: SupervisorEvent) -> Option<Termination> {
        let (event, reply) = match event {
            SupervisorEvent::Operator(mut request) => {
                let reply = request.reply.take();
                (SupervisorEvent::Operator(request), reply)
            }
            other => (other, None),
        };

        let transition = self.supervisor.transition(&self.state, &event);
        debug!(
            event = event.name(),
            from = %self.state.mode,
            to = %transition.next.mode,
            actions = transition.actions.len(),
            "transition"
        );
        self.apply(transition, reply)
    }

    fn apply(
        &mut self,
        transition: Transition,
        reply: Option<oneshot::Sender<OperatorReply>>,
    ) -> Option<Termination> {
        let Transition {
            next,
            actions,
            commit,
            outcome,
        } = transition;

        let termination = match outcome {
            EventOutcome::Rejected(reason) => {
                self.rejected += 1;
                info!(reason = %reason, "operator command rejected");
                answer(reply, OperatorReply::Rejected(reason));
                return None;
            }
            EventOutcome::OutOfOrder(err) => {
                self.out_of_order += 1;
                error!(kind = %ErrorKind::Ordering, error = %err, "detection summary out of order");
                answer(reply, OperatorReply::Failed(err.to_string()));
                return None;
            }
            EventOutcome::Status => {
                answer(reply, OperatorReply::Status(self.state.clone()));
                return None;
            }
            EventOutcome::Ignored => {
                answer(reply, OperatorReply::Accepted(self.state.clone()));
                return None;
            }
            EventOutcome::Applied => None,
            EventOutcome::Terminated(termination) => {
                self.abandon_pending("mission terminated");
                Some(termination)
            }
        };

        let commit_at = match commit {
            _ if termination.is_some() || actions.is_empty() => None,
            CommitPolicy::AllOrNothing => Some(actions.len() - 1),
            CommitPolicy::CommitAfter(index) => Some(index.min(actions.len() - 1)),
            CommitPolicy::BestEffort | CommitPolicy::Queued => None,
        };

        match commit_at {
            Some(commit_at) => self.begin(PendingTransition {
                next,
                actions: actions.into(),
                commit_at,
                acknowledged: 0,
                waiting: None,
                committed: false,
                resent: false,
                reply,
            }),
            None => {
                self.commit(next);
                for action in actions {
                    self.dispatcher.submit(action);
                }
                answer(reply, OperatorReply::Accepted(self.state.clone()));
                termination
            }
        }
    }

    fn begin(&mut self, pending: PendingTransition) -> Option<Termination> {
        debug!(
            to = %pending.next.mode,
            actions = pending.actions.len(),
            commit_at = pending.commit_at,
            "transition pending"
        );
        self.pending = Some(pending);
        self.advance_pending()
    }

    /// Submit the next action of the pending transition, or settle it
    fn advance_pending(&mut self) -> Option<Termination> {
        let command = match self.pending.as_mut().map(|pending| pending.actions.pop_front()) {
            Some(Some(command)) => command,
            Some(None) => return self.settle_pending(),
            None => return None,
        };

        match self.dispatcher.submit(command.clone()).ticket() {
            Some(ticket) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.waiting = Some(ticket);
                }
                None
            }
            None => self.pending_failed(command, DispatchError::Closed),
        }
    }

    fn settle_pending(&mut self) -> Option<Termination> {
        let pending = self.pending.take()?;
        if !pending.committed {
            self.commit(pending.next);
        }
        answer(pending.reply, OperatorReply::Accepted(self.state.clone()));
        self.replay_deferred()
    }

    fn pending_acknowledged(&mut self, command: VehicleCommand) -> Option<Termination> {
        let at = self.started.elapsed();
        let (commit, committed) = match self.pending.as_mut() {
            Some(pending) => {
                pending.waiting = None;
                pending.next.last_command = Some(command.clone());
                pending.next.last_command_at = Some(at);
                let reached = pending.acknowledged == pending.commit_at;
                pending.acknowledged += 1;
                if reached && !pending.committed {
                    pending.committed = true;
                    (Some(pending.next.clone()), false)
                } else {
                    (None, pending.committed)
                }
            }
            None => return None,
        };

        match commit {
            Some(next) => self.commit(next),
            None if committed => self.record_command(command),
            None => {}
        }
        self.advance_pending()
    }

    fn pending_failed(
        &mut self,
        command: VehicleCommand,
        err: DispatchError,
    ) -> Option<Termination> {
        let mut pending = self.pending.take()?;
        let reason = err.to_string();

        if pending.committed {
            warn!(
                command = %command,
                error = %err,
                mode = %self.state.mode,
                "command after commit failed"
            );
            if let DispatchError::Link(link) = err {
                answer(pending.reply, OperatorReply::Failed(reason));
                return Some(self.fail_link(link));
            }
            // A rejected command gets one more try on its own
            if !pending.resent && matches!(err, DispatchError::Rejected { .. }) {
                pending.resent = true;
                pending.actions.push_front(command);
            }
            pending.waiting = None;
            self.pending = Some(pending);
            return self.advance_pending();
        }

        warn!(
            command = %command,
            error = %err,
            mode = %self.state.mode,
            "transition not committed"
        );
        if pending.acknowledged > 0 {
            if let Some(last) = pending.next.last_command.take() {
                self.record_command(last);
            }
        }
        answer(pending.reply, OperatorReply::Failed(reason));
        if let DispatchError::Link(link) = err {
            return Some(self.fail_link(link));
        }
        self.replay_deferred()
    }

    /// Drop the pending transition without committing it
    fn abandon_pending(&mut self, reason: &str) {
        if let Some(pending) = self.pending.take() {
            warn!(to = %pending.next.mode, reason, "pending transition abandoned");
            answer(pending.reply, OperatorReply::Failed(reason.to_string()));
        }
    }

    fn defer(&mut self, event: SupervisorEvent) {
        if self.deferred.len() >= self.deferred_limit {
            // Oldest detection goes first; operator requests are kept when possible
            let index = self
                .deferred
                .iter()
                .position(|deferred| matches!(deferred, SupervisorEvent::Detection(_)))
                .unwrap_or(0);
            if let Some(dropped) = self.deferred.remove(index) {
                warn!(event = dropped.name(), "deferred event dropped");
                refuse(dropped, "event queue full");
            }
        }
        self.deferred.push_back(event);
    }

    fn replay_deferred(&mut self) -> Option<Termination> {
        while self.pending.is_none() {
            let event = self.deferred.pop_front()?;
            if let Some(termination) = self.process(event) {
                return Some(termination);
            }
        }
        None
    }

    /// Telemetry that arrives mid-transition only updates what the vehicle reports
    fn refresh(&mut self, telemetry: &VehicleTelemetry) {
        self.state.heading = Some(telemetry.heading);
        self.state.armed = telemetry.armed;
        if let Some(pending) = self.pending.as_mut() {
            pending.next.heading = Some(telemetry.heading);
            pending.next.armed = telemetry.armed;
        }
        self.snapshots.send_replace(self.state.clone());
    }

    fn on_completion(&mut self, done: Completion) -> Option<Termination> {
        let tracked = self
            .pending
            .as_ref()
            .and_then(|pending| pending.waiting)
            .map_or(false, |ticket| ticket == done.ticket);
        if tracked {
            return match done.result {
                Ok(_) => self.pending_acknowledged(done.command),
                Err(err) => self.pending_failed(done.command, err),
            };
        }

        match done.result {
            Ok(_) => {
                debug!(
                    command = %done.command,
                    attempts = done.attempts,
                    "queued command acknowledged"
                );
                self.record_command(done.command);
                None
            }
            Err(DispatchError::Link(err)) => Some(self.fail_link(err)),
            Err(err) => {
                warn!(command = %done.command, error = %err, "queued command not delivered");
                None
            }
        }
    }

    fn on_telemetry(
        &mut self,
        read: Result<VehicleTelemetry, DispatchError>,
    ) -> Option<Termination> {
        match read {
            Ok(telemetry) => self.handle(SupervisorEvent::Telemetry(telemetry)),
            Err(DispatchError::Link(err)) => Some(self.fail_link(err)),
            Err(err) => {
                warn!(error = %err, "telemetry unavailable");
                None
            }
        }
    }

    /// A link failure skips action execution entirely
    fn fail_link(&mut self, err: LinkError) -> Termination {
        self.abandon_pending("vehicle link lost");
        let transition = self
            .supervisor
            .transition(&self.state, &SupervisorEvent::LinkFailed(err.clone()));
        self.commit(transition.next);
        match transition.outcome {
            EventOutcome::Terminated(termination) => termination,
            _ => Termination {
                kind: Some(ErrorKind::Link),
                reason: err.to_string(),
            },
        }
    }

    fn commit(&mut self, next: MissionState) {
        if next.mode != self.state.mode {
            info!(from = %self.state.mode, to = %next.mode, "mission mode changed");
        }
        self.state = next;
        self.snapshots.send_replace(self.state.clone());
    }

    fn record_command(&mut self, command: VehicleCommand) {
        self.state.last_command = Some(command);
        self.state.last_command_at = Some(self.started.elapsed());
        self.snapshots.send_replace(self.state.clone());
    }

    async fn finish(
        mut self,
        exit: MissionExit,
        termination: Option<Termination>,
    ) -> MissionReport {
        match &termination {
            Some(Termination { kind: Some(kind), reason }) => {
                error!(kind = %kind, condition = %reason, "mission terminated");
            }
            Some(Termination { kind: None, reason }) => {
                info!(reason = %reason, "mission ended by operator");
            }
            None => info!(exit = ?exit, mode = %self.state.mode, "mission supervisor stopped"),
        }

        self.abandon_pending("mission stopped");
        for event in self.deferred.drain(..) {
            refuse(event, "mission stopped");
        }

        let link_lost = matches!(
            termination,
            Some(Termination {
                kind: Some(ErrorKind::Link),
                ..
            })
        );
        if !link_lost {
            for done in self.dispatcher.flush().await {
                match done.result {
                    Ok(_) => self.record_command(done.command),
                    Err(err) => warn!(
                        command = %done.command,
                        error = %err,
                        "queued command lost at shutdown"
                    ),
                }
            }
        }
        self.dispatcher.close().await;

        MissionReport {
            exit,
            termination,
            final_state: self.state.clone(),
            dispatch: self.dispatcher.stats(),
            events: self.events,
            rejected: self.rejected,
            out_of_order: self.out_of_order,
        }
    }
}

/// Resolves with the outstanding telemetry read; never resolves without one
async fn outstanding(read: &mut Option<TelemetryRead>) -> Result<VehicleTelemetry, DispatchError> {
    match read {
        Some(read) => read.await,
        None => std::future::pending().await,
    }
}

fn answer(reply: Option<oneshot::Sender<OperatorReply>>, message: OperatorReply) {
    if let Some(reply) = reply {
        // Operator may have stopped waiting
        let _ = reply.send(message);
    }
}

/// Answer an operator request that will never be processed
fn refuse(event: SupervisorEvent, reason: &str) {
    if let SupervisorEvent::Operator(mut request) = event {
        answer(request.reply.take(), OperatorReply::Failed(reason.to_string()));
    }
}
