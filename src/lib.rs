//! netgauge -- network diagnostics driven by iperf3, ping and traceroute.
//!
//! This crate wraps the external tools as supervised child processes, parses
//! their streaming text output into typed progress events and results, and
//! sequences them into speed, ping, traceroute and full tests.

pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod parsers;
pub mod process;
pub mod progress;
pub mod report;

pub use config::NetgaugeConfig;
pub use error::EngineError;
pub use model::{FullResult, PingResult, SpeedResult, TestTarget, TracerouteResult};
pub use orchestrator::{FullTestRequest, SpeedOptions, TestEngine};
pub use progress::{EngineMessage, ProgressEmitter, ProgressEvent, ProgressSink};
