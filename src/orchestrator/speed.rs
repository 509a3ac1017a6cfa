//! Two-phase throughput test.
//!
//! `Idle -> RunningDownload -> RunningUpload -> Complete`, or `Failed` from
//! either running state. The phases run back to back; the second is never
//! started if the first fails.

use tracing::{debug, info};

use super::{drive, TestContext, TestEngine};
use crate::error::EngineError;
use crate::model::{Direction, Protocol, SpeedResult, TestKind, TestResultData, TestTarget, TransferTotals};
use crate::parsers::bandwidth::{BandwidthParser, INTERVAL_PROGRESS_CEILING};
use crate::parsers::OutputParser;
use crate::process::{Invocation, ProcessExit};
use crate::progress::{PhaseProgress, ProgressPhase};

/// Knobs for one speed test.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedOptions {
    pub duration_secs: u32,
    /// Run the download phase with iperf3's reverse flag (`-R`) and the
    /// upload phase without it, instead of the other way round.
    pub reverse: bool,
    pub streams: u32,
    pub protocol: Protocol,
    pub udp_bitrate: Option<String>,
}

/// What one direction contributes to the final result.
#[derive(Debug, Clone)]
struct PhaseTotals {
    totals: TransferTotals,
    jitter_ms: Option<f64>,
    loss_pct: Option<f64>,
}

impl TestEngine {
    /// Speed options for `duration_secs`/`reverse` with every other knob
    /// taken from the configured defaults.
    pub fn speed_options(&self, duration_secs: u32, reverse: bool) -> SpeedOptions {
        SpeedOptions {
            duration_secs,
            reverse,
            streams: self.defaults.streams.max(1),
            protocol: self.defaults.protocol,
            udp_bitrate: self.defaults.udp_bitrate.clone(),
        }
    }

    pub async fn run_speed_test(
        &self,
        target: &TestTarget,
        duration_secs: u32,
        reverse: bool,
    ) -> Result<SpeedResult, EngineError> {
        let options = self.speed_options(duration_secs, reverse);
        self.run_speed_test_with(target, &options).await
    }

    pub async fn run_speed_test_with(
        &self,
        target: &TestTarget,
        options: &SpeedOptions,
    ) -> Result<SpeedResult, EngineError> {
        let ctx = TestContext::new(TestKind::Speed);
        let result = self.speed_sequence(&ctx, target, options).await;
        self.complete(&ctx, target, result, TestResultData::Speed)
    }

    pub(super) async fn speed_sequence(
        &self,
        ctx: &TestContext,
        target: &TestTarget,
        options: &SpeedOptions,
    ) -> Result<SpeedResult, EngineError> {
        let mut milestones = PhaseProgress::new(100.0);
        self.emitter.progress(ctx.event(
            ProgressPhase::Speed,
            milestones.advance(0.0),
            format!("Starting speed test against {target}"),
        ));

        let download = self
            .bandwidth_phase(ctx, target, options, Direction::Download, options.reverse)
            .await?;

        self.emitter.progress(ctx.event(
            ProgressPhase::Speed,
            milestones.advance(50.0),
            "Download test complete, starting upload test",
        ));

        let upload = self
            .bandwidth_phase(ctx, target, options, Direction::Upload, !options.reverse)
            .await?;

        self.emitter.progress(
            ctx.event(ProgressPhase::Speed, milestones.complete(), "Upload test complete").completed(),
        );

        let (jitter_ms, packet_loss_pct) = if download.jitter_ms.is_some() || download.loss_pct.is_some() {
            (download.jitter_ms, download.loss_pct)
        } else {
            (upload.jitter_ms, upload.loss_pct)
        };

        let result = SpeedResult {
            download: download.totals,
            upload: upload.totals,
            jitter_ms,
            packet_loss_pct,
        };
        info!(
            test_id = %ctx.id,
            download_mbps = result.download.bandwidth_bps / 1_000_000.0,
            upload_mbps = result.upload.bandwidth_bps / 1_000_000.0,
            "speed test complete"
        );
        Ok(result)
    }

    /// Run iperf3 once for `direction` and extract that direction's totals.
    async fn bandwidth_phase(
        &self,
        ctx: &TestContext,
        target: &TestTarget,
        options: &SpeedOptions,
        direction: Direction,
        reverse_flag: bool,
    ) -> Result<PhaseTotals, EngineError> {
        let phase = match direction {
            Direction::Upload => ProgressPhase::Upload,
            _ => ProgressPhase::Download,
        };
        debug!(test_id = %ctx.id, %direction, reverse_flag, "starting bandwidth phase");

        let run = self.runner.spawn(Invocation {
            name: "iperf3",
            tool: self.tools.iperf3.clone(),
            args: iperf_args(target, options, reverse_flag),
            deadline: self.timeouts.speed_deadline(options.duration_secs),
        })?;

        let parser = BandwidthParser::new(Some(direction), options.duration_secs, options.streams > 1);
        let mut progress = PhaseProgress::new(INTERVAL_PROGRESS_CEILING);
        let (parser, exit) = drive(run, parser, |_, report| {
            let mut event = ctx.event(
                phase,
                progress.advance(report.percent),
                format!(
                    "Testing {direction}... {}/{}s",
                    report.interval, options.duration_secs
                ),
            );
            event.current_speed_mbps = Some(report.sample.mbps());
            event.interval_data = Some(report.sample);
            self.emitter.progress(event);
        })
        .await;

        exit?.into_result()?;
        let summary = parser.finish()?;
        let line = match direction {
            Direction::Upload => summary.sender()?,
            _ => summary.receiver()?,
        };
        let (jitter_ms, loss_pct) = summary.link_quality();

        self.emitter.progress(
            ctx.event(
                phase,
                progress.complete(),
                format!(
                    "{} complete: {:.2} Mbps",
                    capitalize(direction),
                    line.totals.bandwidth_bps / 1_000_000.0
                ),
            )
            .completed(),
        );

        Ok(PhaseTotals {
            totals: line.totals.clone(),
            jitter_ms,
            loss_pct,
        })
    }

    /// Run a one-second forward iperf3 probe and report whether the peer
    /// answered with a complete run. Emits no progress.
    pub async fn check_connectivity(&self, target: &TestTarget) -> bool {
        let options = self.speed_options(1, false);
        let run = match self.runner.spawn(Invocation {
            name: "iperf3",
            tool: self.tools.iperf3.clone(),
            args: iperf_args(target, &options, false),
            deadline: self.timeouts.speed_deadline(1),
        }) {
            Ok(run) => run,
            Err(e) => {
                debug!(%target, error = %e, "connectivity check could not start");
                return false;
            }
        };

        let parser = BandwidthParser::new(Some(Direction::Upload), 1, options.streams > 1);
        let (parser, exit) = drive(run, parser, |_, _| {}).await;
        match exit.and_then(ProcessExit::into_result) {
            Ok(_) => parser.finish().is_ok(),
            Err(e) => {
                debug!(%target, error = %e, "connectivity check failed");
                false
            }
        }
    }
}

fn capitalize(direction: Direction) -> &'static str {
    match direction {
        Direction::Download => "Download",
        Direction::Upload => "Upload",
        Direction::Unknown => "Transfer",
    }
}

/// Build the iperf3 client command line. `--forceflush` keeps the output
/// line-buffered when stdout is a pipe.
fn iperf_args(target: &TestTarget, options: &SpeedOptions, reverse: bool) -> Vec<String> {
    let mut args = vec![
        "-c".to_string(),
        target.address().to_string(),
        "-p".to_string(),
        target.port().to_string(),
        "-t".to_string(),
        options.duration_secs.to_string(),
        "-i".to_string(),
        "1".to_string(),
        "--forceflush".to_string(),
    ];
    if options.streams > 1 {
        args.push("-P".to_string());
        args.push(options.streams.to_string());
    }
    if options.protocol == Protocol::Udp {
        args.push("-u".to_string());
        if let Some(bitrate) = &options.udp_bitrate {
            args.push("-b".to_string());
            args.push(bitrate.clone());
        }
    }
    if reverse {
        args.push("-R".to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SpeedOptions {
        SpeedOptions {
            duration_secs: 10,
            reverse: false,
            streams: 1,
            protocol: Protocol::Tcp,
            udp_bitrate: None,
        }
    }

    #[test]
    fn test_iperf_args_forward() {
        let target = TestTarget::new("10.0.0.2", 5201).unwrap();
        let args = iperf_args(&target, &options(), false);
        assert_eq!(
            args,
            vec!["-c", "10.0.0.2", "-p", "5201", "-t", "10", "-i", "1", "--forceflush"]
        );
    }

    #[test]
    fn test_iperf_args_reverse_udp_parallel() {
        let target = TestTarget::new("10.0.0.2", 5202).unwrap();
        let opts = SpeedOptions {
            streams: 4,
            protocol: Protocol::Udp,
            udp_bitrate: Some("100M".into()),
            ..options()
        };
        let args = iperf_args(&target, &opts, true);
        assert!(args.windows(2).any(|w| w == ["-P", "4"]));
        assert!(args.windows(2).any(|w| w == ["-b", "100M"]));
        assert!(args.contains(&"-u".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-R"));
    }
}
