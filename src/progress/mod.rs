//! Progress events and the injectable sink they are delivered to.
//!
//! The engine never owns a transport. Whatever hosts it (a WebSocket
//! broadcaster, the CLI, a test) installs a [`ProgressSink`] into a
//! [`ProgressEmitter`], and the emitter is handed to the engine at
//! construction.

pub mod sinks;

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::TestReport;
use crate::parsers::bandwidth::IntervalSample;

/// Which stream of progress an event belongs to. Percentages only ever
/// increase within one phase of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    /// Milestones of a full test (0 / 25 / 75 / 100).
    Suite,
    /// Milestones of a speed test (0 / 50 / 100).
    Speed,
    Download,
    Upload,
    Ping,
    Traceroute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPing {
    pub sequence: u32,
    pub time_ms: f64,
    pub completed: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub test_id: Uuid,
    pub message: String,
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ProgressPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_speed_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ping: Option<CurrentPing>,
    /// Every round-trip time observed so far, for client-side jitter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_times: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_data: Option<IntervalSample>,
    /// Set on the event that closes a phase.
    #[serde(default)]
    pub completed: bool,
}

impl ProgressEvent {
    pub fn new(test_id: Uuid, phase: ProgressPhase, percent: f64, message: impl Into<String>) -> Self {
        Self {
            test_id,
            message: message.into(),
            percent,
            phase: Some(phase),
            current_speed_mbps: None,
            current_ping: None,
            ping_times: None,
            interval_data: None,
            completed: false,
        }
    }

    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }
}

/// Everything the engine pushes to its sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineMessage {
    TestProgress(ProgressEvent),
    TestComplete(TestReport),
}

impl EngineMessage {
    pub fn as_progress(&self) -> Option<&ProgressEvent> {
        match self {
            EngineMessage::TestProgress(event) => Some(event),
            EngineMessage::TestComplete(_) => None,
        }
    }
}

/// Receiver of engine messages.
///
/// Called from test tasks, possibly from several concurrently. Implementations
/// must return promptly and must not panic.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, message: &EngineMessage);
}

impl<F> ProgressSink for F
where
    F: Fn(&EngineMessage) + Send + Sync,
{
    fn emit(&self, message: &EngineMessage) {
        self(message)
    }
}

/// Shared, swappable handle to the installed sink.
#[derive(Clone)]
pub struct ProgressEmitter {
    sink: Arc<RwLock<Arc<dyn ProgressSink>>>,
}

impl ProgressEmitter {
    pub fn new(sink: impl ProgressSink + 'static) -> Self {
        Self {
            sink: Arc::new(RwLock::new(Arc::new(sink))),
        }
    }

    /// An emitter that discards everything.
    pub fn disabled() -> Self {
        Self::new(sinks::NullSink)
    }

    /// Install a different sink. Every clone of this emitter sees the change.
    pub fn replace(&self, sink: impl ProgressSink + 'static) {
        let sink: Arc<dyn ProgressSink> = Arc::new(sink);
        match self.sink.write() {
            Ok(mut guard) => *guard = sink,
            Err(poisoned) => *poisoned.into_inner() = sink,
        }
    }

    pub fn emit(&self, message: EngineMessage) {
        // Clone the sink out so the lock is not held while it runs.
        let sink = match self.sink.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        sink.emit(&message);
    }

    pub fn progress(&self, event: ProgressEvent) {
        tracing::trace!(
            test_id = %event.test_id,
            phase = ?event.phase,
            percent = event.percent,
            "progress"
        );
        self.emit(EngineMessage::TestProgress(event));
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter").finish_non_exhaustive()
    }
}

/// Keeps one phase's percentage monotonic and below its ceiling until the
/// phase has been confirmed complete.
#[derive(Debug, Clone)]
pub struct PhaseProgress {
    last: f64,
    ceiling: f64,
}

impl PhaseProgress {
    pub fn new(ceiling: f64) -> Self {
        Self {
            last: 0.0,
            ceiling: ceiling.min(100.0),
        }
    }

    /// Clamp `raw` into `[last, ceiling]` and remember it.
    pub fn advance(&mut self, raw: f64) -> f64 {
        let clamped = if raw.is_finite() { raw.min(self.ceiling) } else { self.last };
        self.last = self.last.max(clamped);
        self.last
    }

    /// The only way to reach 100%.
    pub fn complete(&mut self) -> f64 {
        self.last = 100.0;
        self.last
    }

    pub fn current(&self) -> f64 {
        self.last
    }
}
