//! Ping, then speed, then traceroute, all under one test id.

use super::{SpeedOptions, TestContext, TestEngine};
use crate::error::EngineError;
use crate::model::{FullResult, TestKind, TestResultData, TestTarget};
use crate::progress::{PhaseProgress, ProgressPhase};

/// Parameters of a full diagnostic run.
#[derive(Debug, Clone, PartialEq)]
pub struct FullTestRequest {
    pub ping_count: u32,
    pub speed: SpeedOptions,
    pub max_hops: u32,
}

impl TestEngine {
    /// A full-test request with the remaining speed knobs taken from the
    /// configured defaults.
    pub fn full_request(
        &self,
        duration_secs: u32,
        ping_count: u32,
        reverse: bool,
        max_hops: u32,
    ) -> FullTestRequest {
        FullTestRequest {
            ping_count,
            speed: self.speed_options(duration_secs, reverse),
            max_hops,
        }
    }

    /// Run ping, speed and traceroute in that order. The first failure ends
    /// the run and is returned unchanged; later sub-tests are not started.
    pub async fn run_full_test(
        &self,
        target: &TestTarget,
        duration_secs: u32,
        ping_count: u32,
        reverse: bool,
        max_hops: u32,
    ) -> Result<FullResult, EngineError> {
        let request = self.full_request(duration_secs, ping_count, reverse, max_hops);
        self.run_full_test_with(target, &request).await
    }

    pub async fn run_full_test_with(
        &self,
        target: &TestTarget,
        request: &FullTestRequest,
    ) -> Result<FullResult, EngineError> {
        let ctx = TestContext::new(TestKind::Full);
        let result = self.full_sequence(&ctx, target, request).await;
        self.complete(&ctx, target, result, TestResultData::Full)
    }

    async fn full_sequence(
        &self,
        ctx: &TestContext,
        target: &TestTarget,
        request: &FullTestRequest,
    ) -> Result<FullResult, EngineError> {
        let mut suite = PhaseProgress::new(100.0);
        self.emitter.progress(ctx.event(
            ProgressPhase::Suite,
            suite.advance(0.0),
            format!("Starting full test against {target}"),
        ));

        let ping = self.ping_phase(ctx, target, request.ping_count).await?;
        self.emitter.progress(ctx.event(
            ProgressPhase::Suite,
            suite.advance(25.0),
            "Ping complete, starting speed test",
        ));

        let speed = self.speed_sequence(ctx, target, &request.speed).await?;
        self.emitter.progress(ctx.event(
            ProgressPhase::Suite,
            suite.advance(75.0),
            "Speed test complete, starting traceroute",
        ));

        let traceroute = self.traceroute_phase(ctx, target, request.max_hops).await?;
        self.emitter.progress(
            ctx.event(ProgressPhase::Suite, suite.complete(), "Full test complete").completed(),
        );

        Ok(FullResult {
            ping,
            speed,
            traceroute,
        })
    }
}
