use crate::status::SubmissionStatus;
use crate::status_store::StatusStore;
use crate::submission::context::{CertificateInfo, SubmissionContext, SubmissionMessage};
use crate::submission::finalizer::{FinalizeOutcome, Finalizer};
use crate::submission::stage::{ChainOutcome, StageChain};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a delivery turned into. `Discarded` deliveries are acknowledged
/// without processing. `Cancelled` only occurs before the status row was
/// claimed; a shutdown that lands after the claim degrades the submission
/// to the error status instead, so no row is stranded in `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed(SubmissionStatus),
    Discarded,
    Cancelled,
}

/// Drives one queued submission end to end: claims its status row, runs
/// the validation chain, and finalizes. Infrastructure failures along the
/// way degrade to the error status so the message is never redelivered
/// into a half-written state.
pub struct SubmissionProcessor {
    status: Arc<dyn StatusStore>,
    chain: StageChain,
    finalizer: Finalizer,
}

impl SubmissionProcessor {
    pub fn new(status: Arc<dyn StatusStore>, chain: StageChain, finalizer: Finalizer) -> Self {
        Self {
            status,
            chain,
            finalizer,
        }
    }

    pub async fn process(
        &self,
        token: Uuid,
        message: SubmissionMessage,
        certificate: CertificateInfo,
        shutdown: &CancellationToken,
    ) -> ProcessOutcome {
        // Before the claim the row is still in queue and the unacked
        // message simply comes back on the next run.
        if shutdown.is_cancelled() {
            tracing::info!(
                target: "reportsink::pipeline",
                event = "processing_cancelled_before_claim",
                token = %token,
            );
            return ProcessOutcome::Cancelled;
        }

        let info = match self.status.find(token).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                tracing::warn!(
                    target: "reportsink::pipeline",
                    event = "status_row_missing",
                    token = %token,
                );
                return ProcessOutcome::Discarded;
            }
            Err(err) => {
                tracing::error!(
                    target: "reportsink::pipeline",
                    event = "status_lookup_failed",
                    token = %token,
                    error = %err,
                );
                return ProcessOutcome::Discarded;
            }
        };

        if info.status != SubmissionStatus::InQueue {
            tracing::info!(
                target: "reportsink::pipeline",
                event = "submission_already_handled",
                token = %token,
                status = info.status.code(),
            );
            return ProcessOutcome::Discarded;
        }

        match self.status.begin_processing(token).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    target: "reportsink::pipeline",
                    event = "submission_claimed_elsewhere",
                    token = %token,
                );
                return ProcessOutcome::Discarded;
            }
            Err(err) => {
                tracing::error!(
                    target: "reportsink::pipeline",
                    event = "status_claim_failed",
                    token = %token,
                    error = %err,
                );
                return ProcessOutcome::Discarded;
            }
        }

        let mut ctx = SubmissionContext::new(token, info.id, message, certificate);

        match self.chain.run(&mut ctx, shutdown).await {
            Ok(ChainOutcome::Completed) => {}
            Ok(ChainOutcome::Cancelled) => return self.cancelled_after_claim(token).await,
            Err(err) => return self.to_error_state(token, "chain_failed", err).await,
        }

        match self.finalizer.finalize(&ctx, shutdown).await {
            Ok(FinalizeOutcome::Committed(status)) => ProcessOutcome::Completed(status),
            Ok(FinalizeOutcome::Cancelled) => self.cancelled_after_claim(token).await,
            Err(err) => self.to_error_state(token, "finalize_failed", err).await,
        }
    }

    /// The row was already moved to processing, so a redelivery would be
    /// discarded by the idempotency guard. Record the error status and let
    /// the delivery be acknowledged.
    async fn cancelled_after_claim(&self, token: Uuid) -> ProcessOutcome {
        tracing::warn!(
            target: "reportsink::pipeline",
            event = "processing_cancelled",
            token = %token,
        );

        if let Err(err) = self.status.mark_error(token).await {
            tracing::error!(
                target: "reportsink::pipeline",
                event = "mark_error_failed",
                token = %token,
                error = %err,
            );
        }

        ProcessOutcome::Completed(SubmissionStatus::Error)
    }

    async fn to_error_state(
        &self,
        token: Uuid,
        event: &'static str,
        err: crate::error::Error,
    ) -> ProcessOutcome {
        tracing::error!(
            target: "reportsink::pipeline",
            event = event,
            token = %token,
            error = %err,
        );

        if let Err(err) = self.status.mark_error(token).await {
            tracing::error!(
                target: "reportsink::pipeline",
                event = "mark_error_failed",
                token = %token,
                error = %err,
            );
        }

        ProcessOutcome::Completed(SubmissionStatus::Error)
    }
}
