use tracing::{debug, info};

use super::{drive, TestContext, TestEngine};
use crate::error::EngineError;
use crate::model::{TestKind, TestResultData, TestTarget, TracerouteResult};
use crate::parsers::traceroute::TRACE_PROGRESS_CEILING;
use crate::parsers::{OutputParser, TracerouteParser};
use crate::process::Invocation;
use crate::progress::{PhaseProgress, ProgressPhase};

impl TestEngine {
    pub async fn run_traceroute_test(
        &self,
        target: &TestTarget,
        max_hops: u32,
    ) -> Result<TracerouteResult, EngineError> {
        let ctx = TestContext::new(TestKind::Traceroute);
        let result = self.traceroute_phase(&ctx, target, max_hops).await;
        self.complete(&ctx, target, result, TestResultData::Traceroute)
    }

    /// traceroute exits nonzero whenever the last hops never answer, so a
    /// failed exit is only an error when no hop could be parsed.
    pub(super) async fn traceroute_phase(
        &self,
        ctx: &TestContext,
        target: &TestTarget,
        max_hops: u32,
    ) -> Result<TracerouteResult, EngineError> {
        let max_hops = max_hops.max(1);
        let mut progress = PhaseProgress::new(TRACE_PROGRESS_CEILING);
        self.emitter.progress(ctx.event(
            ProgressPhase::Traceroute,
            progress.advance(0.0),
            format!("Tracing route to {} (max {max_hops} hops)", target.address()),
        ));

        let run = self.runner.spawn(Invocation {
            name: "traceroute",
            tool: self.tools.traceroute.clone(),
            args: vec![
                "-m".to_string(),
                max_hops.to_string(),
                "-n".to_string(),
                target.address().to_string(),
            ],
            deadline: self.timeouts.traceroute_deadline(),
        })?;

        let parser = TracerouteParser::new(target.address(), max_hops);
        let (parser, exit) = drive(run, parser, |_, report| {
            let who = match &report.hop.hostname {
                Some(name) => format!("{name} ({})", report.hop.address),
                None => report.hop.address.clone(),
            };
            self.emitter.progress(ctx.event(
                ProgressPhase::Traceroute,
                progress.advance(report.percent),
                format!("Hop {}: {who}", report.hop.hop_index),
            ));
        })
        .await;

        let exit = exit?;
        let result = match parser.finish() {
            Ok(result) => result,
            Err(parse_err) => {
                exit.into_result()?;
                return Err(parse_err);
            }
        };
        if !exit.success() {
            debug!(
                test_id = %ctx.id,
                code = ?exit.code,
                hops = result.hops.len(),
                "traceroute exited nonzero, keeping parsed hops"
            );
        }

        self.emitter.progress(
            ctx.event(
                ProgressPhase::Traceroute,
                progress.complete(),
                format!("Traceroute complete: {} hops", result.hops.len()),
            )
            .completed(),
        );
        info!(test_id = %ctx.id, host = result.host.as_str(), hops = result.hops.len(), "traceroute complete");
        Ok(result)
    }
}
