//! `ping` output parser (iputils and BSD formats).

use std::collections::HashSet;
use std::sync::OnceLock;

use regex_lite::Regex;

use super::OutputParser;
use crate::error::EngineError;
use crate::model::{PingResult, PingTimes};

const TOOL: &str = "ping";

fn reply_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\d+ bytes from .+?: icmp_seq=(?P<seq>\d+)(?:\s+ttl=\d+)?\s+time[=<](?P<time>\d+(?:\.\d+)?)\s*ms",
        )
        .expect("static ping reply regex")
    })
}

fn stats_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<tx>\d+) packets transmitted, (?P<rx>\d+) (?:packets )?received,(?:\s+\+\d+ \w+,)*\s+(?P<loss>\d+(?:\.\d+)?)% packet loss",
        )
        .expect("static ping statistics regex")
    })
}

fn timing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = (?P<min>\d+(?:\.\d+)?)/(?P<avg>\d+(?:\.\d+)?)/(?P<max>\d+(?:\.\d+)?)/(?P<dev>\d+(?:\.\d+)?) ms",
        )
        .expect("static ping timing regex")
    })
}

/// One echo reply as it arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct PingReply {
    pub sequence: u32,
    pub time_ms: f64,
    /// Replies seen so far, this one included.
    pub completed: u32,
    /// `100 * completed / count`, uncapped.
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PacketStats {
    transmitted: u32,
    received: u32,
    loss_pct: f64,
}

#[derive(Debug, Clone)]
pub struct PingParser {
    host: String,
    count: u32,
    samples: Vec<f64>,
    seen: HashSet<u32>,
    stats: Option<PacketStats>,
    times: Option<PingTimes>,
}

impl PingParser {
    pub fn new(host: impl Into<String>, count: u32) -> Self {
        Self {
            host: host.into(),
            count: count.max(1),
            samples: Vec::new(),
            seen: HashSet::new(),
            stats: None,
            times: None,
        }
    }

    /// Round-trip times observed so far, in arrival order.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }
}

impl OutputParser for PingParser {
    type Event = PingReply;
    type Output = PingResult;

    fn parse_line(&mut self, line: &str) -> Option<PingReply> {
        if let Some(caps) = reply_re().captures(line) {
            let sequence = caps["seq"].parse().ok()?;
            let time_ms: f64 = caps["time"].parse().ok()?;
            // duplicates are neither progress nor samples
            if line.trim_end().ends_with("(DUP!)") || !self.seen.insert(sequence) {
                return None;
            }
            self.samples.push(time_ms);
            let completed = self.samples.len() as u32;
            return Some(PingReply {
                sequence,
                time_ms,
                completed,
                percent: 100.0 * f64::from(completed) / f64::from(self.count),
            });
        }

        if let Some(caps) = stats_re().captures(line) {
            if let (Ok(transmitted), Ok(received), Ok(loss_pct)) = (
                caps["tx"].parse::<u32>(),
                caps["rx"].parse::<u32>(),
                caps["loss"].parse::<f64>(),
            ) {
                self.stats = Some(PacketStats {
                    transmitted,
                    received,
                    loss_pct,
                });
            }
        } else if let Some(caps) = timing_re().captures(line) {
            if let (Ok(min), Ok(avg), Ok(max), Ok(stddev)) = (
                caps["min"].parse::<f64>(),
                caps["avg"].parse::<f64>(),
                caps["max"].parse::<f64>(),
                caps["dev"].parse::<f64>(),
            ) {
                self.times = Some(PingTimes {
                    min,
                    avg,
                    max,
                    stddev,
                });
            }
        }
        None
    }

    fn finish(self) -> Result<PingResult, EngineError> {
        let stats = self
            .stats
            .ok_or_else(|| EngineError::parse(TOOL, "packet statistics line not found"))?;
        let times = self
            .times
            .ok_or_else(|| EngineError::parse(TOOL, "timing statistics line not found"))?;

        Ok(PingResult {
            host: self.host,
            packets_transmitted: stats.transmitted,
            packets_received: stats.received,
            packet_loss_pct: stats.loss_pct,
            times,
        })
    }
}

/// Population standard deviation of round-trip samples, for callers whose
/// tool output lacks a deviation figure. `None` with fewer than two samples.
pub fn sample_jitter(samples: &[f64]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    Some(variance.sqrt())
}
