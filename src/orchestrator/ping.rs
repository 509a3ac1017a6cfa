use tracing::info;

use super::{drive, TestContext, TestEngine};
use crate::error::EngineError;
use crate::model::{PingResult, TestKind, TestResultData, TestTarget};
use crate::parsers::{OutputParser, PingParser};
use crate::process::Invocation;
use crate::progress::{CurrentPing, PhaseProgress, ProgressPhase};

/// Progress never reaches 100% until ping has exited.
const PING_PROGRESS_CEILING: f64 = 95.0;

impl TestEngine {
    pub async fn run_ping_test(&self, target: &TestTarget, count: u32) -> Result<PingResult, EngineError> {
        let ctx = TestContext::new(TestKind::Ping);
        let result = self.ping_phase(&ctx, target, count).await;
        self.complete(&ctx, target, result, TestResultData::Ping)
    }

    pub(super) async fn ping_phase(
        &self,
        ctx: &TestContext,
        target: &TestTarget,
        count: u32,
    ) -> Result<PingResult, EngineError> {
        let count = count.max(1);
        let mut progress = PhaseProgress::new(PING_PROGRESS_CEILING);
        self.emitter.progress(ctx.event(
            ProgressPhase::Ping,
            progress.advance(0.0),
            format!("Pinging {} ({count} packets)", target.address()),
        ));

        let run = self.runner.spawn(Invocation {
            name: "ping",
            tool: self.tools.ping.clone(),
            args: vec!["-c".to_string(), count.to_string(), target.address().to_string()],
            deadline: self.timeouts.ping_deadline(count),
        })?;

        let parser = PingParser::new(target.address(), count);
        let (parser, exit) = drive(run, parser, |parser, reply| {
            let mut event = ctx.event(
                ProgressPhase::Ping,
                progress.advance(reply.percent),
                format!("Ping {}/{count}: {:.1}ms", reply.completed, reply.time_ms),
            );
            event.current_ping = Some(CurrentPing {
                sequence: reply.sequence,
                time_ms: reply.time_ms,
                completed: reply.completed,
                total: count,
            });
            event.ping_times = Some(parser.samples().to_vec());
            self.emitter.progress(event);
        })
        .await;

        exit?.into_result()?;
        let result = parser.finish()?;

        self.emitter.progress(
            ctx.event(
                ProgressPhase::Ping,
                progress.complete(),
                format!(
                    "Ping complete: {}% loss, avg {:.2} ms",
                    result.packet_loss_pct, result.times.avg
                ),
            )
            .completed(),
        );
        info!(
            test_id = %ctx.id,
            host = result.host.as_str(),
            received = result.packets_received,
            loss_pct = result.packet_loss_pct,
            avg_ms = result.times.avg,
            "ping complete"
        );
        Ok(result)
    }
}
