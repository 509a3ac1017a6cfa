//! `traceroute` output parser.
//!
//! Hop lines come in a few shapes depending on flags and luck:
//!
//! ```text
//!  1  192.168.1.1  0.412 ms  0.377 ms  0.351 ms
//!  2  * * *
//!  3  10.20.0.1  4.101 ms *  4.223 ms
//!  4  core1.isp.net (203.0.113.9)  9.8 ms  9.9 ms  10.1 ms
//!  5  198.51.100.7  12.0 ms !H  198.51.100.8  12.4 ms  12.2 ms
//! ```
//!
//! Every probe keeps its slot: an unanswered probe (`*`) is recorded as
//! `-1.0`. The hop number printed by the tool is kept as-is, even when the
//! tool repeats or skips one.

use super::OutputParser;
use crate::error::EngineError;
use crate::model::{TracerouteHop, TracerouteResult};

const TOOL: &str = "traceroute";

/// Heuristic progress never passes this before the tool exits.
pub const TRACE_PROGRESS_CEILING: f64 = 90.0;

/// Event produced for each parsed hop line.
#[derive(Debug, Clone, PartialEq)]
pub struct HopReport {
    pub hop: TracerouteHop,
    pub lines_seen: u32,
    pub percent: f64,
}

#[derive(Debug, Clone)]
pub struct TracerouteParser {
    host: String,
    max_hops: u32,
    lines_seen: u32,
    hops: Vec<TracerouteHop>,
}

impl TracerouteParser {
    pub fn new(host: impl Into<String>, max_hops: u32) -> Self {
        Self {
            host: host.into(),
            max_hops: max_hops.max(1),
            lines_seen: 0,
            hops: Vec::new(),
        }
    }

    pub fn hops(&self) -> &[TracerouteHop] {
        &self.hops
    }

    /// `lines_seen / max_hops`, capped at 90%.
    pub fn percent(&self) -> f64 {
        (100.0 * f64::from(self.lines_seen) / f64::from(self.max_hops)).min(TRACE_PROGRESS_CEILING)
    }
}

/// Parse one hop line; `None` for headers and anything else.
pub fn parse_hop(line: &str) -> Option<TracerouteHop> {
    let mut tokens = line.split_whitespace().peekable();
    let hop_index: u32 = tokens.next()?.parse().ok()?;

    let mut address: Option<String> = None;
    let mut hostname: Option<String> = None;
    let mut times = Vec::new();

    while let Some(tok) = tokens.next() {
        if tok == "*" {
            times.push(-1.0);
            continue;
        }
        // "0.412ms" (some builds print no space)
        if let Some(value) = tok.strip_suffix("ms").and_then(|v| v.parse::<f64>().ok()) {
            times.push(value);
            continue;
        }
        if let Ok(value) = tok.parse::<f64>() {
            if tokens.peek() == Some(&"ms") {
                tokens.next();
                times.push(value);
                continue;
            }
        }
        if let Some(inner) = tok.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            if hostname.is_none() && times.is_empty() {
                hostname = address.replace(inner.to_string());
            }
            continue;
        }
        // !H, !N, !X ... annotations
        if tok.starts_with('!') {
            continue;
        }
        // Later responders on the same line are not recorded separately.
        if address.is_none() {
            address = Some(tok.to_string());
        }
    }

    let address = address.unwrap_or_else(|| "*".to_string());
    let hostname = hostname.filter(|h| *h != address);

    Some(TracerouteHop {
        hop_index,
        address,
        hostname,
        round_trip_times_ms: times,
    })
}

impl OutputParser for TracerouteParser {
    type Event = HopReport;
    type Output = TracerouteResult;

    fn parse_line(&mut self, line: &str) -> Option<HopReport> {
        if line.trim().is_empty() {
            return None;
        }
        self.lines_seen += 1;

        let hop = parse_hop(line)?;
        self.hops.push(hop.clone());
        Some(HopReport {
            hop,
            lines_seen: self.lines_seen,
            percent: self.percent(),
        })
    }

    fn finish(self) -> Result<TracerouteResult, EngineError> {
        if self.hops.is_empty() {
            return Err(EngineError::parse(TOOL, "no hop lines found"));
        }
        Ok(TracerouteResult {
            host: self.host,
            hops: self.hops,
        })
    }
}
