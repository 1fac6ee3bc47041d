//! Command dispatcher
//!
//! Sole owner of the vehicle link. Every command belongs to a channel
//! ([`CommandChannel`]); a channel has at most one command in flight and a
//! single pending slot behind it. A newer submission replaces whatever is
//! waiting in the slot, so a command is never sent twice and stale commands
//! are never sent at all.

use crate::error::DispatchError;
use crate::link::{send_command, LinkAck, LinkFault, VehicleLink};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use garuda_core::config::LinkConfig;
use garuda_core::error::LinkError;
use garuda_core::types::{CommandChannel, VehicleCommand, VehicleTelemetry};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identifies one submitted command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Ticket(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Queued(Ticket),
    /// Queued, displacing a command that had not been sent yet
    Superseded { ticket: Ticket, replaced: VehicleCommand },
    /// Dispatcher already closed; nothing will be sent
    Closed,
}

impl Submission {
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            Submission::Queued(ticket) | Submission::Superseded { ticket, .. } => Some(*ticket),
            Submission::Closed => None,
        }
    }
}

/// Final result for one ticket
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub ticket: Ticket,
    pub command: VehicleCommand,
    pub attempts: u32,
    pub result: Result<LinkAck, DispatchError>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl From<&LinkConfig> for RetryPolicy {
    fn from(config: &LinkConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            timeout: config.command_timeout(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&LinkConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub sent: u64,
    pub superseded: u64,
    pub failed: u64,
    pub retries: u64,
}

struct Pending {
    ticket: Ticket,
    command: VehicleCommand,
}

pub struct CommandDispatcher {
    link: Arc<dyn VehicleLink>,
    policy: RetryPolicy,
    pending: HashMap<CommandChannel, Pending>,
    busy: HashSet<CommandChannel>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    ready: VecDeque<Completion>,
    next_ticket: u64,
    stats: DispatchStats,
    closed: bool,
}

impl CommandDispatcher {
    pub fn new(link: Arc<dyn VehicleLink>, policy: RetryPolicy) -> Self {
        Self {
            link,
            policy,
            pending: HashMap::new(),
            busy: HashSet::new(),
            in_flight: FuturesUnordered::new(),
            ready: VecDeque::new(),
            next_ticket: 0,
            stats: DispatchStats::default(),
            closed: false,
        }
    }

    pub fn from_config(link: Arc<dyn VehicleLink>, config: &LinkConfig) -> Self {
        Self::new(link, RetryPolicy::from(config))
    }

    /// Place `command` in its channel's pending slot. Nothing is sent until the
    /// dispatcher is driven by [`next_completion`](Self::next_completion) or
    /// [`execute`](Self::execute).
    pub fn submit(&mut self, command: VehicleCommand) -> Submission {
        if self.closed {
            warn!(command = %command, "dispatcher closed, command dropped");
            return Submission::Closed;
        }

        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.stats.submitted += 1;
        let channel = command.channel();

        match self.pending.insert(channel, Pending { ticket, command }) {
            None => Submission::Queued(ticket),
            Some(old) => {
                self.stats.superseded += 1;
                debug!(replaced = %old.command, ?channel, "pending command superseded");
                self.ready.push_back(Completion {
                    ticket: old.ticket,
                    command: old.command.clone(),
                    attempts: 0,
                    result: Err(DispatchError::Superseded(old.command.to_string())),
                });
                Submission::Superseded {
                    ticket,
                    replaced: old.command,
                }
            }
        }
    }

    /// Whether anything is queued, in flight, or waiting to be reported
    pub fn has_work(&self) -> bool {
        !self.ready.is_empty() || !self.pending.is_empty() || !self.in_flight.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_busy(&self, channel: CommandChannel) -> bool {
        self.busy.contains(&channel)
    }

    /// Next finished command. Launches pending commands whose channel is idle.
    /// Returns `None` when there is nothing left to drive. Cancel-safe.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        if let Some(done) = self.ready.pop_front() {
            return Some(done);
        }
        self.launch_idle();
        let done = self.in_flight.next().await?;
        self.settle(&done);
        Some(done)
    }

    /// Submit `command` and drive the dispatcher until it completes. Completions
    /// of other tickets that arrive meanwhile are kept for `next_completion`.
    pub async fn execute(&mut self, command: VehicleCommand) -> Result<LinkAck, DispatchError> {
        let ticket = match self.submit(command).ticket() {
            Some(ticket) => ticket,
            None => return Err(DispatchError::Closed),
        };

        loop {
            if let Some(pos) = self.ready.iter().position(|c| c.ticket == ticket) {
                if let Some(done) = self.ready.remove(pos) {
                    return done.result;
                }
            }

            self.launch_idle();
            match self.in_flight.next().await {
                Some(done) => {
                    self.settle(&done);
                    if done.ticket == ticket {
                        return done.result;
                    }
                    self.ready.push_back(done);
                }
                None => return Err(DispatchError::Closed),
            }
        }
    }

    /// Drive everything queued to completion
    pub async fn flush(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();
        while self.has_work() {
            match self.next_completion().await {
                Some(completion) => done.push(completion),
                None => break,
            }
        }
        done
    }

    /// Telemetry read under the same timeout and retry policy as commands.
    /// The returned future does not borrow the dispatcher, so commands keep
    /// being driven while a read is outstanding.
    pub fn telemetry(&self) -> BoxFuture<'static, Result<VehicleTelemetry, DispatchError>> {
        if self.closed {
            return futures::future::ready(Err(DispatchError::Closed)).boxed();
        }
        let link = self.link.clone();
        let policy = self.policy;
        async move { read_telemetry(link, policy).await }.boxed()
    }

    /// Drop anything not yet sent and release the link
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let dropped = self.pending.len();
        self.pending.clear();
        self.link.close().await;
        info!(
            sent = self.stats.sent,
            failed = self.stats.failed,
            dropped,
            "command dispatcher closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Commands acknowledged by the vehicle
    pub fn sent_count(&self) -> u64 {
        self.stats.sent
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    fn launch_idle(&mut self) {
        let idle: Vec<CommandChannel> = self
            .pending
            .keys()
            .filter(|channel| !self.busy.contains(*channel))
            .copied()
            .collect();

        for channel in idle {
            if let Some(Pending { ticket, command }) = self.pending.remove(&channel) {
                debug!(command = %command, ?ticket, "command launched");
                self.busy.insert(channel);
                let link = self.link.clone();
                let policy = self.policy;
                self.in_flight.push(deliver(link, policy, ticket, command).boxed());
            }
        }
    }

    fn settle(&mut self, done: &Completion) {
        self.busy.remove(&done.command.channel());
        self.stats.retries += u64::from(done.attempts.saturating_sub(1));
        match &done.result {
            Ok(_) => self.stats.sent += 1,
            Err(err) => {
                self.stats.failed += 1;
                warn!(
                    command = %done.command,
                    attempts = done.attempts,
                    error = %err,
                    "command failed"
                );
            }
        }
    }
}

async fn read_telemetry(
    link: Arc<dyn VehicleLink>,
    policy: RetryPolicy,
) -> Result<VehicleTelemetry, DispatchError> {
    for attempt in 1..=policy.max_attempts {
        match tokio::time::timeout(policy.timeout, link.telemetry()).await {
            Ok(Ok(telemetry)) => return Ok(telemetry),
            Ok(Err(LinkFault::Timeout)) | Err(_) => {
                warn!(attempt, max = policy.max_attempts, "telemetry request timed out");
            }
            Ok(Err(LinkFault::Rejected(reason))) => {
                return Err(DispatchError::Rejected {
                    command: "Telemetry".to_string(),
                    reason,
                })
            }
            Ok(Err(LinkFault::Disconnected(reason))) => {
                return Err(LinkError::Disconnected(reason).into())
            }
        }
    }
    Err(LinkError::RetriesExhausted {
        command: "Telemetry".to_string(),
        attempts: policy.max_attempts,
    }
    .into())
}

async fn deliver(
    link: Arc<dyn VehicleLink>,
    policy: RetryPolicy,
    ticket: Ticket,
    command: VehicleCommand,
) -> Completion {
    let mut attempts = 0;
    let result = loop {
        attempts += 1;
        match tokio::time::timeout(policy.timeout, send_command(link.as_ref(), &command)).await {
            Ok(Ok(ack)) => break Ok(ack),
            Ok(Err(LinkFault::Timeout)) | Err(_) => {
                warn!(
                    command = %command,
                    attempt = attempts,
                    max = policy.max_attempts,
                    "command timed out"
                );
                if attempts >= policy.max_attempts {
                    break Err(DispatchError::Link(LinkError::RetriesExhausted {
                        command: command.to_string(),
                        attempts,
                    }));
                }
            }
            Ok(Err(LinkFault::Rejected(reason))) => {
                break Err(DispatchError::Rejected {
                    command: command.to_string(),
                    reason,
                })
            }
            Ok(Err(LinkFault::Disconnected(reason))) => {
                break Err(DispatchError::Link(LinkError::Disconnected(reason)))
            }
        }
    };

    Completion {
        ticket,
        command,
        attempts,
        result,
    }
}
