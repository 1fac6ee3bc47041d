//! Perception loop
//!
//! Runs on a blocking thread: grab a frame, resize it for the model, infer,
//! aggregate, capture, and hand the summary to the supervisor. Summaries are
//! sent in capture order.

use crate::aggregator::DetectionAggregator;
use crate::camera::FrameSource;
use crate::capture::CaptureRecorder;
use crate::error::VisionError;
use crate::inference::{InferenceBackend, ModelInput};
use bytes::Bytes;
use chrono::Local;
use garuda_core::error::InferenceError;
use garuda_core::event::{PerceptionFault, SupervisorEvent};
use garuda_core::shutdown::ShutdownSignal;
use garuda_core::types::Frame;
use serde::Serialize;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PerceptionExit {
    Shutdown,
    SourceExhausted,
    Escalated,
    SupervisorGone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerceptionStats {
    pub frames: u64,
    pub dropped_frames: u64,
    pub summaries_sent: u64,
    pub captures: u64,
    pub exit: PerceptionExit,
}

enum FrameFailure {
    Camera(String),
    Inference(InferenceError),
}

impl FrameFailure {
    fn describe(&self) -> String {
        match self {
            FrameFailure::Camera(reason) => reason.clone(),
            FrameFailure::Inference(err) => err.to_string(),
        }
    }
}

impl From<VisionError> for FrameFailure {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Inference(err) => FrameFailure::Inference(err),
            other => FrameFailure::Camera(other.to_string()),
        }
    }
}

pub struct PerceptionLoop<S, B> {
    source: S,
    backend: B,
    aggregator: DetectionAggregator,
    recorder: Option<CaptureRecorder>,
    events: mpsc::Sender<SupervisorEvent>,
    shutdown: ShutdownSignal,
    max_consecutive_failures: u32,
}

impl<S, B> PerceptionLoop<S, B>
where
    S: FrameSource + Send + 'static,
    B: InferenceBackend + Send + 'static,
{
    pub fn new(
        source: S,
        backend: B,
        aggregator: DetectionAggregator,
        events: mpsc::Sender<SupervisorEvent>,
        shutdown: ShutdownSignal,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            source,
            backend,
            aggregator,
            recorder: None,
            events,
            shutdown,
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    pub fn with_recorder(mut self, recorder: CaptureRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Run on tokio's blocking pool
    pub fn spawn(self) -> JoinHandle<PerceptionStats> {
        tokio::task::spawn_blocking(move || self.run())
    }

    /// Run on the current thread until shutdown, end of stream, escalation, or
    /// the supervisor hanging up. Must not be called from an async context.
    pub fn run(mut self) -> PerceptionStats {
        let started = Instant::now();
        let mut stats = PerceptionStats {
            frames: 0,
            dropped_frames: 0,
            summaries_sent: 0,
            captures: 0,
            exit: PerceptionExit::Shutdown,
        };
        let mut consecutive = 0u32;
        let mut seq = 0u64;

        info!(
            input_size = ?self.backend.input_size(),
            max_failures = self.max_consecutive_failures,
            "perception loop started"
        );

        loop {
            if self.shutdown.is_shutdown() {
                stats.exit = PerceptionExit::Shutdown;
                break;
            }

            let image = match self.source.grab() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    info!(frames = stats.frames, "frame source exhausted");
                    let _ = self.events.blocking_send(SupervisorEvent::PerceptionEnded);
                    stats.exit = PerceptionExit::SourceExhausted;
                    break;
                }
                Err(err) => {
                    stats.dropped_frames += 1;
                    if self.escalate_if_needed(&mut consecutive, err.into()) {
                        stats.exit = PerceptionExit::Escalated;
                        break;
                    }
                    continue;
                }
            };

            seq += 1;
            stats.frames += 1;
            let (width, height) = image.dimensions();
            let pixels = Bytes::from(image.into_raw());
            let frame = match Frame::new(seq, started.elapsed(), width, height, pixels) {
                Ok(frame) => frame,
                Err(reason) => {
                    stats.dropped_frames += 1;
                    if self.escalate_if_needed(&mut consecutive, FrameFailure::Camera(reason)) {
                        stats.exit = PerceptionExit::Escalated;
                        break;
                    }
                    continue;
                }
            };

            let detections = ModelInput::from_frame(&frame, self.backend.input_size())
                .and_then(|input| self.backend.infer(&input));
            let detections = match detections {
                Ok(detections) => detections,
                Err(err) => {
                    stats.dropped_frames += 1;
                    if self.escalate_if_needed(&mut consecutive, FrameFailure::Inference(err)) {
                        stats.exit = PerceptionExit::Escalated;
                        break;
                    }
                    continue;
                }
            };
            consecutive = 0;

            let summary = self.aggregator.aggregate(frame.meta(), &detections);
            if let Some(recorder) = self.recorder.as_mut() {
                stats.captures += recorder.record(&frame, &summary, Local::now()).len() as u64;
            }

            if self.events.blocking_send(SupervisorEvent::Detection(summary)).is_err() {
                warn!(frame = seq, "supervisor channel closed, stopping perception");
                stats.exit = PerceptionExit::SupervisorGone;
                break;
            }
            stats.summaries_sent += 1;
        }

        self.source.release();
        info!(
            frames = stats.frames,
            dropped = stats.dropped_frames,
            sent = stats.summaries_sent,
            exit = ?stats.exit,
            "perception loop stopped"
        );
        stats
    }

    /// Count a dropped frame; returns true once the failure budget is spent and
    /// the fault has been reported
    fn escalate_if_needed(&mut self, consecutive: &mut u32, failure: FrameFailure) -> bool {
        *consecutive += 1;
        warn!(
            consecutive = *consecutive,
            error = %failure.describe(),
            "frame dropped"
        );
        if *consecutive < self.max_consecutive_failures {
            return false;
        }

        let fault = match failure {
            FrameFailure::Camera(reason) => PerceptionFault::Camera(format!(
                "{} consecutive failures, last: {}",
                consecutive, reason
            )),
            FrameFailure::Inference(err) => PerceptionFault::Inference(InferenceError::Escalated {
                count: *consecutive,
                last: err.to_string(),
            }),
        };
        error!(fault = %fault, "perception escalating");
        let _ = self.events.blocking_send(SupervisorEvent::PerceptionFault(fault));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::ScriptedFrameSource;
    use crate::inference::ScriptedBackend;
    use crate::labels::LabelTable;
    use garuda_core::config::VisionConfig;
    use garuda_core::shutdown;
    use garuda_core::types::{NormalizedBox, RawDetection};

    fn aggregator() -> DetectionAggregator {
        DetectionAggregator::new(
            LabelTable::from_names(["square", "triangle", "circle"]),
            &VisionConfig::default(),
        )
    }

    fn hit(class_index: i64) -> RawDetection {
        RawDetection {
            class_index,
            confidence: 0.95,
            bbox: NormalizedBox([0.1, 0.1, 0.4, 0.4]),
        }
    }

    #[test]
    fn test_summaries_in_capture_order() {
        let (_trigger, signal) = shutdown::channel();
        let (tx, mut rx) = mpsc::channel(16);
        let source = ScriptedFrameSource::solid(3, 16, 12, [20, 20, 20]);
        let backend = ScriptedBackend::new((8, 8)).respond(vec![hit(0), hit(1)]);

        let stats = PerceptionLoop::new(source, backend, aggregator(), tx, signal, 5).run();
        assert_eq!(stats.exit, PerceptionExit::SourceExhausted);
        assert_eq!(stats.summaries_sent, 3);

        let mut seqs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                SupervisorEvent::Detection(summary) => seqs.push(summary.frame_seq),
                SupervisorEvent::PerceptionEnded => seqs.push(0),
                other => panic!("unexpected event {}", other.name()),
            }
        }
        assert_eq!(seqs, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_escalates_after_consecutive_failures() {
        let (_trigger, signal) = shutdown::channel();
        let (tx, mut rx) = mpsc::channel(16);
        let source = ScriptedFrameSource::solid(6, 8, 8, [0, 0, 0]);
        let backend = ScriptedBackend::new((8, 8))
            .fail("a")
            .fail("b")
            .fail("c");

        let stats = PerceptionLoop::new(source, backend, aggregator(), tx, signal, 3).run();
        assert_eq!(stats.exit, PerceptionExit::Escalated);
        assert_eq!(stats.dropped_frames, 3);

        match rx.try_recv().unwrap() {
            SupervisorEvent::PerceptionFault(PerceptionFault::Inference(InferenceError::Escalated {
                count,
                ..
            })) => assert_eq!(count, 3),
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[test]
    fn test_failure_streak_resets_on_success() {
        let (_trigger, signal) = shutdown::channel();
        let (tx, _rx) = mpsc::channel(16);
        let source = ScriptedFrameSource::solid(5, 8, 8, [0, 0, 0]);
        let backend = ScriptedBackend::new((8, 8))
            .fail("a")
            .respond(vec![])
            .fail("b")
            .respond(vec![])
            .fail("c");

        let stats = PerceptionLoop::new(source, backend, aggregator(), tx, signal, 2).run();
        assert_eq!(stats.exit, PerceptionExit::SourceExhausted);
        assert_eq!(stats.dropped_frames, 3);
        assert_eq!(stats.summaries_sent, 2);
    }

    #[test]
    fn test_stops_on_shutdown() {
        let (trigger, signal) = shutdown::channel();
        let (tx, _rx) = mpsc::channel(16);
        trigger.trigger();
        let source = ScriptedFrameSource::solid(3, 8, 8, [0, 0, 0]);
        let backend = ScriptedBackend::new((8, 8));
        let seen = backend.seen();

        let stats = PerceptionLoop::new(source, backend, aggregator(), tx, signal, 5).run();
        assert_eq!(stats.exit, PerceptionExit::Shutdown);
        assert_eq!(stats.frames, 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_stops_when_supervisor_gone() {
        let (_trigger, signal) = shutdown::channel();
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let source = ScriptedFrameSource::solid(3, 8, 8, [0, 0, 0]);
        let backend = ScriptedBackend::new((8, 8));
        let stats = PerceptionLoop::new(source, backend, aggregator(), tx, signal, 5).run();
        assert_eq!(stats.exit, PerceptionExit::SupervisorGone);
        assert_eq!(stats.frames, 1);
    }
}
