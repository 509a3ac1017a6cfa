//! Ready-made progress sinks.

use std::io::Write;

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{EngineMessage, ProgressSink};

/// Drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _message: &EngineMessage) {}
}

/// Logs every message through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, message: &EngineMessage) {
        match message {
            EngineMessage::TestProgress(event) => debug!(
                test_id = %event.test_id,
                phase = ?event.phase,
                percent = event.percent,
                "{}",
                event.message
            ),
            EngineMessage::TestComplete(report) => info!(
                test_id = %report.id,
                test_type = %report.test_type,
                target = %report.target,
                "test complete"
            ),
        }
    }
}

/// Fans messages out to any number of subscribers, e.g. one per connected
/// WebSocket client. Sending never blocks; slow subscribers lag and lose
/// the oldest messages.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<EngineMessage>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineMessage> {
        self.tx.subscribe()
    }
}

impl ProgressSink for BroadcastSink {
    fn emit(&self, message: &EngineMessage) {
        // No subscribers is not an error.
        let _ = self.tx.send(message.clone());
    }
}

/// One JSON object per line on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesSink;

impl ProgressSink for JsonLinesSink {
    fn emit(&self, message: &EngineMessage) {
        match serde_json::to_string(message) {
            Ok(line) => {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out, "{line}");
                let _ = out.flush();
            }
            Err(e) => debug!(error = %e, "failed to serialize engine message"),
        }
    }
}

/// Human-readable progress lines on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn emit(&self, message: &EngineMessage) {
        if let EngineMessage::TestProgress(event) = message {
            let mut line = format!("[{:>5.1}%] {}", event.percent, event.message);
            if let Some(mbps) = event.current_speed_mbps {
                line.push_str(&format!(" ({mbps:.1} Mbps)"));
            }
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{line}");
        }
    }
}
