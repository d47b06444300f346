use crate::error::Result;
use crate::submission::context::SubmissionContext;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// One step of the validation chain.
///
/// Stages run unconditionally and in a fixed order; a stage that depends
/// on earlier results checks the context flags itself and degrades to a
/// no-op instead of short-circuiting the chain. Only infrastructure
/// failures surface as errors.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut SubmissionContext) -> Result<()>;
}

/// Outcome of driving a context through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Completed,
    /// Shutdown was requested before the chain finished; nothing terminal
    /// has been written.
    Cancelled,
}

pub struct StageChain {
    stages: Vec<Box<dyn Stage>>,
}

impl StageChain {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub async fn run(
        &self,
        ctx: &mut SubmissionContext,
        shutdown: &CancellationToken,
    ) -> Result<ChainOutcome> {
        for stage in &self.stages {
            if shutdown.is_cancelled() {
                tracing::info!(
                    target: "reportsink::pipeline",
                    event = "chain_cancelled",
                    token = %ctx.token,
                    stage = stage.name(),
                );
                return Ok(ChainOutcome::Cancelled);
            }

            let span = tracing::info_span!("stage", name = stage.name(), token = %ctx.token);
            stage.run(ctx).instrument(span).await?;

            tracing::debug!(
                target: "reportsink::pipeline",
                event = "stage_completed",
                token = %ctx.token,
                stage = stage.name(),
                model_valid = ctx.model_valid,
                file_valid = ctx.file_valid,
                report_valid = ctx.report_valid,
                finding_count = ctx.findings.len(),
            );
        }

        Ok(ChainOutcome::Completed)
    }
}
