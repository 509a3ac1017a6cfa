//! Test targets and the typed results handed back to callers.
//!
//! Results are serialized in camelCase because they travel verbatim to the
//! browser dashboard inside `test_complete` messages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Remote peer a test runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTarget")]
pub struct TestTarget {
    address: String,
    port: u16,
}

/// Unchecked wire form of [`TestTarget`].
#[derive(Deserialize)]
struct RawTarget {
    address: String,
    port: u16,
}

impl TryFrom<RawTarget> for TestTarget {
    type Error = EngineError;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        Self::new(raw.address, raw.port)
    }
}

impl TestTarget {
    /// Validate and build a target. The address ends up on a command line,
    /// so anything that could be read as an option is rejected.
    pub fn new(address: impl Into<String>, port: u16) -> Result<Self, EngineError> {
        let address = address.into();
        if address.is_empty() {
            return Err(EngineError::InvalidTarget("address cannot be empty".into()));
        }
        if address.starts_with('-') {
            return Err(EngineError::InvalidTarget(format!(
                "address cannot start with a hyphen: {address}"
            )));
        }
        // `%` only as an IPv6 zone suffix (fe80::1%eth0)
        let (host, zone) = match address.split_once('%') {
            Some((host, zone)) if host.contains(':') && !zone.is_empty() => (host, zone),
            Some(_) => {
                return Err(EngineError::InvalidTarget(format!(
                    "zone index only allowed on IPv6 addresses: {address}"
                )))
            }
            None => (address.as_str(), ""),
        };
        if host
            .chars()
            .chain(zone.chars())
            .any(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | ':' | '_'))
        {
            return Err(EngineError::InvalidTarget(format!(
                "address contains invalid characters: {address}"
            )));
        }
        Ok(Self { address, port })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for TestTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Direction of one throughput measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
    Unknown,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
            Direction::Unknown => write!(f, "unknown"),
        }
    }
}

/// Transport used by the throughput tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// Totals for one direction of a speed test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTotals {
    pub bandwidth_bps: f64,
    pub bytes: u64,
    pub duration_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedResult {
    pub download: TransferTotals,
    pub upload: TransferTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_loss_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingTimes {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResult {
    pub host: String,
    pub packets_transmitted: u32,
    pub packets_received: u32,
    pub packet_loss_pct: f64,
    pub times: PingTimes,
}

/// One hop of a route trace. A timing of `-1.0` means the probe got no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerouteHop {
    pub hop_index: u32,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub round_trip_times_ms: Vec<f64>,
}

impl TracerouteHop {
    /// True when every probe of this hop went unanswered.
    pub fn is_silent(&self) -> bool {
        self.round_trip_times_ms.iter().all(|t| *t < 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteResult {
    pub host: String,
    pub hops: Vec<TracerouteHop>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullResult {
    pub ping: PingResult,
    pub speed: SpeedResult,
    pub traceroute: TracerouteResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Speed,
    Ping,
    Traceroute,
    Full,
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestKind::Speed => write!(f, "speed"),
            TestKind::Ping => write!(f, "ping"),
            TestKind::Traceroute => write!(f, "traceroute"),
            TestKind::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestResultData {
    Full(FullResult),
    Speed(SpeedResult),
    Ping(PingResult),
    Traceroute(TracerouteResult),
}

/// Payload of a `test_complete` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub id: Uuid,
    pub test_type: TestKind,
    pub target: TestTarget,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub results: TestResultData,
}
