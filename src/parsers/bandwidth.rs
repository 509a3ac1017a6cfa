//! iperf3 human-readable output parser.
//!
//! Interval lines look like
//!
//! ```text
//! [  5]   3.00-4.00   sec   112 MBytes   941 Mbits/sec    0    433 KBytes
//! ```
//!
//! and the run ends with a sender/receiver pair:
//!
//! ```text
//! [  5]   0.00-10.00  sec  1.10 GBytes   941 Mbits/sec   12             sender
//! [  5]   0.00-10.04  sec  1.09 GBytes   937 Mbits/sec                  receiver
//! ```
//!
//! UDP receiver summaries additionally carry `jitter ms  lost/total (pct%)`.

use std::sync::OnceLock;

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{si_scaled, OutputParser};
use crate::error::EngineError;
use crate::model::{Direction, TransferTotals};

const TOOL: &str = "iperf3";

/// Interval progress never reaches 100% from output alone.
pub const INTERVAL_PROGRESS_CEILING: f64 = 95.0;

fn measurement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\[\s*(?P<id>\d+|SUM)\]\s+(?:\[[A-Z-]+\]\s+)?(?P<start>\d+(?:\.\d+)?)-\s*(?P<end>\d+(?:\.\d+)?)\s+sec\s+(?P<size>\d+(?:\.\d+)?)\s+(?P<size_unit>[KMGT]?)Bytes\s+(?P<rate>\d+(?:\.\d+)?)\s+(?P<rate_unit>[KMGT]?)bits/sec(?P<rest>.*)$",
        )
        .expect("static iperf3 measurement regex")
    })
}

fn udp_quality_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<jitter>\d+(?:\.\d+)?)\s+ms\s+\d+/\d+\s+\((?P<loss>[0-9.eE+-]+)%\)")
            .expect("static iperf3 udp regex")
    })
}

/// One periodic throughput measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalSample {
    pub window_start: f64,
    pub window_end: f64,
    pub bits_per_second: f64,
    pub phase: Direction,
}

impl IntervalSample {
    pub fn mbps(&self) -> f64 {
        self.bits_per_second / 1_000_000.0
    }
}

/// Event produced for each interval line.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalReport {
    pub sample: IntervalSample,
    /// 1-based interval counter.
    pub interval: u32,
    pub percent: f64,
}

/// One sender- or receiver-tagged summary line.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryLine {
    pub totals: TransferTotals,
    pub jitter_ms: Option<f64>,
    pub loss_pct: Option<f64>,
}

/// Final totals of one iperf3 run.
#[derive(Debug, Clone, PartialEq)]
pub struct BandwidthSummary {
    pub sender: Option<SummaryLine>,
    pub receiver: Option<SummaryLine>,
}

impl BandwidthSummary {
    /// Totals as measured by the receiving end.
    pub fn receiver(&self) -> Result<&SummaryLine, EngineError> {
        self.receiver
            .as_ref()
            .ok_or_else(|| EngineError::parse(TOOL, "no receiver summary line"))
    }

    /// Totals as measured by the sending end.
    pub fn sender(&self) -> Result<&SummaryLine, EngineError> {
        self.sender
            .as_ref()
            .ok_or_else(|| EngineError::parse(TOOL, "no sender summary line"))
    }

    /// UDP jitter/loss from whichever summary reports it, receiver first.
    pub fn link_quality(&self) -> (Option<f64>, Option<f64>) {
        [self.receiver.as_ref(), self.sender.as_ref()]
            .into_iter()
            .flatten()
            .find(|s| s.jitter_ms.is_some() || s.loss_pct.is_some())
            .map(|s| (s.jitter_ms, s.loss_pct))
            .unwrap_or((None, None))
    }
}

#[derive(Debug, Clone)]
pub struct BandwidthParser {
    explicit: Option<Direction>,
    inferred: Direction,
    duration_secs: u32,
    aggregate_only: bool,
    intervals: u32,
    sender: Option<SummaryLine>,
    receiver: Option<SummaryLine>,
}

impl BandwidthParser {
    /// `direction` is what the orchestrator asked for; when `None` the
    /// direction is guessed from the tool's banner. `parallel` restricts
    /// parsing to `[SUM]` lines.
    pub fn new(direction: Option<Direction>, duration_secs: u32, parallel: bool) -> Self {
        Self {
            explicit: direction,
            inferred: Direction::Unknown,
            duration_secs: duration_secs.max(1),
            aggregate_only: parallel,
            intervals: 0,
            sender: None,
            receiver: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.explicit.unwrap_or(self.inferred)
    }

    pub fn intervals_seen(&self) -> u32 {
        self.intervals
    }

    fn infer_direction(&mut self, line: &str) {
        if self.explicit.is_some() || self.inferred != Direction::Unknown {
            return;
        }
        let lower = line.to_ascii_lowercase();
        if lower.contains("reverse") || lower.contains("download") {
            self.inferred = Direction::Download;
        } else if lower.contains("upload") {
            self.inferred = Direction::Upload;
        }
    }
}

fn number(caps: &Captures<'_>, name: &str) -> Option<f64> {
    caps.name(name)?.as_str().parse().ok()
}

fn scaled(caps: &Captures<'_>, value: &str, unit: &str) -> Option<f64> {
    si_scaled(caps.name(value)?.as_str(), caps.name(unit)?.as_str())
}

impl OutputParser for BandwidthParser {
    type Event = IntervalReport;
    type Output = BandwidthSummary;

    fn parse_line(&mut self, line: &str) -> Option<IntervalReport> {
        let Some(caps) = measurement_re().captures(line) else {
            self.infer_direction(line);
            return None;
        };

        let is_sum = &caps["id"] == "SUM";
        if self.aggregate_only && !is_sum {
            return None;
        }

        let start = number(&caps, "start")?;
        let end = number(&caps, "end")?;
        let bits_per_second = scaled(&caps, "rate", "rate_unit")?;
        let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");

        let is_sender = rest.contains("sender");
        let is_receiver = rest.contains("receiver");
        if is_sender || is_receiver {
            let bytes = scaled(&caps, "size", "size_unit")?.round() as u64;
            let quality = udp_quality_re().captures(rest);
            let summary = SummaryLine {
                totals: TransferTotals {
                    bandwidth_bps: bits_per_second,
                    bytes,
                    duration_sec: end - start,
                },
                jitter_ms: quality.as_ref().and_then(|q| number(q, "jitter")),
                loss_pct: quality.as_ref().and_then(|q| number(q, "loss")),
            };
            trace!(sender = is_sender, bps = bits_per_second, bytes, "iperf3 summary line");
            if is_sender {
                self.sender = Some(summary);
            } else {
                self.receiver = Some(summary);
            }
            return None;
        }

        self.intervals += 1;
        let percent = (100.0 * f64::from(self.intervals) / f64::from(self.duration_secs))
            .min(INTERVAL_PROGRESS_CEILING);

        Some(IntervalReport {
            sample: IntervalSample {
                window_start: start,
                window_end: end,
                bits_per_second,
                phase: self.direction(),
            },
            interval: self.intervals,
            percent,
        })
    }

    fn finish(self) -> Result<BandwidthSummary, EngineError> {
        if self.sender.is_none() && self.receiver.is_none() {
            return Err(EngineError::parse(TOOL, "no sender/receiver summary found"));
        }
        Ok(BandwidthSummary {
            sender: self.sender,
            receiver: self.receiver,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::LineAssembler;

    const TCP_RUN: &str = "\
Connecting to host 192.168.1.50, port 5201
[  5] local 192.168.1.10 port 40022 connected to 192.168.1.50 port 5201
[ ID] Interval           Transfer     Bitrate         Retr  Cwnd
[  5]   0.00-1.00   sec   112 MBytes   941 Mbits/sec    0    433 KBytes
[  5]   1.00-2.00   sec   112 MBytes   942 Mbits/sec    0    433 KBytes
[  5]   2.00-3.00   sec   111 MBytes   935 Mbits/sec    3    301 KBytes
- - - - - - - - - - - - - - - - - - - - - - - - -
[ ID] Interval           Transfer     Bitrate         Retr
[  5]   0.00-3.00   sec   335 MBytes   939 Mbits/sec    3             sender
[  5]   0.00-3.04   sec   333 MBytes   919 Mbits/sec                  receiver

iperf Done.
";

    fn parse_all(parser: &mut BandwidthParser, text: &str) -> Vec<IntervalReport> {
        text.lines().filter_map(|l| parser.parse_line(l)).collect()
    }

    #[test]
    fn test_interval_lines_become_samples() {
        let mut parser = BandwidthParser::new(Some(Direction::Download), 3, false);
        let events = parse_all(&mut parser, TCP_RUN);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sample.bits_per_second, 941_000_000.0);
        assert_eq!(events[0].sample.window_start, 0.0);
        assert_eq!(events[0].sample.window_end, 1.0);
        assert_eq!(events[0].sample.phase, Direction::Download);
        assert_eq!(events[2].interval, 3);
    }

    #[test]
    fn test_progress_is_capped_at_95() {
        let mut parser = BandwidthParser::new(Some(Direction::Upload), 3, false);
        let percents: Vec<f64> = parse_all(&mut parser, TCP_RUN)
            .iter()
            .map(|e| e.percent)
            .collect();
        assert!((percents[0] - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(percents[2], 95.0);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_summary_lines() {
        let mut parser = BandwidthParser::new(Some(Direction::Download), 3, false);
        parse_all(&mut parser, TCP_RUN);
        let summary = parser.finish().unwrap();

        let sender = summary.sender().unwrap();
        assert_eq!(sender.totals.bandwidth_bps, 939_000_000.0);
        assert_eq!(sender.totals.bytes, 335_000_000);
        assert_eq!(sender.totals.duration_sec, 3.0);

        let receiver = summary.receiver().unwrap();
        assert_eq!(receiver.totals.bandwidth_bps, 919_000_000.0);
        assert!((receiver.totals.duration_sec - 3.04).abs() < 1e-9);
        assert_eq!(summary.link_quality(), (None, None));
    }

    #[test]
    fn test_ten_gig_run_scenario() {
        let text = "\
[  5]   0.00-1.00   sec  1.16 GBytes  10000 Mbits/sec    0   3.01 MBytes
[  5]   0.00-10.00  sec  99.6 GBytes  85.5 Gbits/sec    0             sender
[  5]   0.00-10.00  sec  99.6 GBytes  85.5 Gbits/sec                  receiver
";
        let mut parser = BandwidthParser::new(Some(Direction::Download), 10, false);
        let events = parse_all(&mut parser, text);
        assert_eq!(events[0].sample.bits_per_second, 10_000_000_000.0);

        let summary = parser.finish().unwrap();
        let receiver = summary.receiver().unwrap();
        assert_eq!(receiver.totals.bandwidth_bps, 85_500_000_000.0);
        assert_eq!(receiver.totals.bytes, 99_600_000_000);
    }

    #[test]
    fn test_missing_summary_is_parse_error() {
        let mut parser = BandwidthParser::new(Some(Direction::Download), 10, false);
        parser.parse_line("[  5]   0.00-1.00   sec   112 MBytes   941 Mbits/sec    0    433 KBytes");
        assert!(matches!(parser.finish(), Err(EngineError::Parse { .. })));
    }

    #[test]
    fn test_parallel_streams_use_sum_lines_only() {
        let text = "\
[  5]   0.00-1.00   sec  56.2 MBytes   472 Mbits/sec    0    245 KBytes
[  7]   0.00-1.00   sec  56.0 MBytes   470 Mbits/sec    0    245 KBytes
[SUM]   0.00-1.00   sec   112 MBytes   942 Mbits/sec    0
[SUM]   0.00-1.00   sec   112 MBytes   942 Mbits/sec    0             sender
[SUM]   0.00-1.04   sec   111 MBytes   896 Mbits/sec                  receiver
";
        let mut parser = BandwidthParser::new(Some(Direction::Upload), 1, true);
        let events = parse_all(&mut parser, text);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sample.bits_per_second, 942_000_000.0);
        let summary = parser.finish().unwrap();
        assert_eq!(summary.receiver().unwrap().totals.bandwidth_bps, 896_000_000.0);
    }

    #[test]
    fn test_udp_receiver_reports_jitter_and_loss() {
        let text = "\
[  5]   0.00-10.00  sec  1.25 MBytes  1.05 Mbits/sec  0.000 ms  0/906 (0%)  sender
[  5]   0.00-10.04  sec  1.24 MBytes  1.04 Mbits/sec  0.012 ms  3/906 (0.33%)  receiver
";
        let mut parser = BandwidthParser::new(Some(Direction::Download), 10, false);
        parse_all(&mut parser, text);
        let summary = parser.finish().unwrap();
        assert_eq!(summary.receiver().unwrap().jitter_ms, Some(0.012));
        assert_eq!(summary.link_quality(), (Some(0.012), Some(0.33)));
    }

    #[test]
    fn test_direction_falls_back_to_banner() {
        let mut parser = BandwidthParser::new(None, 10, false);
        parser.parse_line("Reverse mode, remote host 10.0.0.2 is sending");
        let event = parser
            .parse_line("[  5]   0.00-1.00   sec   112 MBytes   941 Mbits/sec")
            .unwrap();
        assert_eq!(event.sample.phase, Direction::Download);

        let mut parser = BandwidthParser::new(None, 10, false);
        let event = parser
            .parse_line("[  5]   0.00-1.00   sec   112 MBytes   941 Mbits/sec")
            .unwrap();
        assert_eq!(event.sample.phase, Direction::Unknown);
    }

    #[test]
    fn test_chunking_does_not_change_events() {
        let bytes = TCP_RUN.as_bytes();
        let mut whole = BandwidthParser::new(Some(Direction::Download), 3, false);
        let expected = parse_all(&mut whole, TCP_RUN);
        let expected_summary = whole.finish().unwrap();

        for offset in 0..=bytes.len() {
            let mut asm = LineAssembler::new();
            let mut parser = BandwidthParser::new(Some(Direction::Download), 3, false);
            let mut got = Vec::new();
            for chunk in [&bytes[..offset], &bytes[offset..]] {
                for line in asm.feed(chunk) {
                    got.extend(parser.parse_line(&line));
                }
            }
            if let Some(line) = asm.flush() {
                got.extend(parser.parse_line(&line));
            }
            assert_eq!(got, expected, "split at byte {offset}");
            assert_eq!(parser.finish().unwrap(), expected_summary);
        }
    }
}
