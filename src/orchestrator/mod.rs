//! Test sequencing: one logical test owns at most one external process at a
//! time and turns its output into progress events and a typed result.
//!
//! Top-level entry points (`run_speed_test`, `run_ping_test`,
//! `run_traceroute_test`, `run_full_test`) are single-shot: they either
//! return the complete result or the first error, and on success emit one
//! `test_complete` message.

mod full;
mod ping;
mod speed;
mod traceroute;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};
use uuid::Uuid;

use crate::config::{NetgaugeConfig, TestDefaults, TimeoutConfig, ToolsConfig};
use crate::error::EngineError;
use crate::model::{TestKind, TestReport, TestResultData, TestTarget};
use crate::parsers::OutputParser;
use crate::process::{LineAssembler, ProcessExit, ProcessRunner, RunningProcess};
use crate::progress::{EngineMessage, ProgressEmitter, ProgressEvent, ProgressPhase};

pub use self::full::FullTestRequest;
pub use self::speed::SpeedOptions;

/// Runs diagnostic tests against remote targets.
///
/// Cloning shares the emitter and the cancellation token; use
/// [`TestEngine::child`] to get an engine that can be cancelled on its own.
#[derive(Debug, Clone)]
pub struct TestEngine {
    tools: Arc<ToolsConfig>,
    timeouts: Arc<TimeoutConfig>,
    defaults: Arc<TestDefaults>,
    emitter: ProgressEmitter,
    cancel: CancellationToken,
    runner: ProcessRunner,
}

impl TestEngine {
    pub fn new(config: &NetgaugeConfig, emitter: ProgressEmitter) -> Self {
        let cancel = CancellationToken::new();
        Self {
            tools: Arc::new(config.tools.clone()),
            timeouts: Arc::new(config.timeouts.clone()),
            defaults: Arc::new(config.defaults.clone()),
            emitter,
            runner: ProcessRunner::new(cancel.clone()),
            cancel,
        }
    }

    /// An engine sharing this one's configuration and emitter whose tests
    /// are cancelled by `self.cancel()` as well as by its own `cancel()`.
    pub fn child(&self) -> Self {
        let cancel = self.cancel.child_token();
        Self {
            tools: Arc::clone(&self.tools),
            timeouts: Arc::clone(&self.timeouts),
            defaults: Arc::clone(&self.defaults),
            emitter: self.emitter.clone(),
            runner: ProcessRunner::new(cancel.clone()),
            cancel,
        }
    }

    /// Terminate any live process of this engine and fail its tests with
    /// `EngineError::Cancelled`. Irreversible.
    pub fn cancel(&self) {
        info!("cancelling running tests");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn emitter(&self) -> &ProgressEmitter {
        &self.emitter
    }

    pub fn defaults(&self) -> &TestDefaults {
        &self.defaults
    }

    /// Emit `test_complete` on success, log on failure, pass the result on.
    fn complete<T: Clone>(
        &self,
        ctx: &TestContext,
        target: &TestTarget,
        result: Result<T, EngineError>,
        wrap: fn(T) -> TestResultData,
    ) -> Result<T, EngineError> {
        match &result {
            Ok(value) => {
                info!(test_id = %ctx.id, test_type = %ctx.kind, %target, "test finished");
                self.emitter.emit(EngineMessage::TestComplete(TestReport {
                    id: ctx.id,
                    test_type: ctx.kind,
                    target: target.clone(),
                    timestamp: Utc::now(),
                    results: wrap(value.clone()),
                }));
            }
            Err(e) => {
                warn!(test_id = %ctx.id, test_type = %ctx.kind, %target, error = %e, "test failed");
            }
        }
        result
    }
}

/// Identity of one top-level test invocation.
#[derive(Debug, Clone)]
struct TestContext {
    id: Uuid,
    kind: TestKind,
}

impl TestContext {
    fn new(kind: TestKind) -> Self {
        let ctx = Self {
            id: Uuid::new_v4(),
            kind,
        };
        info!(test_id = %ctx.id, test_type = %kind, "test started");
        ctx
    }

    fn event(&self, phase: ProgressPhase, percent: f64, message: impl Into<String>) -> ProgressEvent {
        ProgressEvent::new(self.id, phase, percent, message)
    }
}

/// Feed a process's output through `parser` line by line, in stream order,
/// handing each event to `on_event`. Returns the parser and the process's
/// outcome once its output has closed.
async fn drive<P, F>(
    mut run: RunningProcess,
    mut parser: P,
    mut on_event: F,
) -> (P, Result<ProcessExit, EngineError>)
where
    P: OutputParser,
    F: FnMut(&P, P::Event),
{
    let command = run.handle().command.clone();
    let mut lines = LineAssembler::new();

    while let Some(chunk) = run.next_chunk().await {
        for line in lines.feed(&chunk) {
            trace!(command = command.as_str(), line = line.as_str(), "tool output");
            if let Some(event) = parser.parse_line(&line) {
                on_event(&parser, event);
            }
        }
    }
    if let Some(line) = lines.flush() {
        trace!(command = command.as_str(), line = line.as_str(), "tool output (unterminated)");
        if let Some(event) = parser.parse_line(&line) {
            on_event(&parser, event);
        }
    }

    let exit = run.wait().await;
    (parser, exit)
}
