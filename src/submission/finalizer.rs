use crate::archive::{SubmissionArchive, SubmissionRecord};
use crate::artifacts::{file_stem, ArtifactPaths, ArtifactStore, StatusReport};
use crate::engines::{AnalyticsFeed, SpreadsheetRenderer, StatusPdfRenderer};
use crate::error::Result;
use crate::notify::{Notifier, SubmittedNotification};
use crate::status::SubmissionStatus;
use crate::submission::context::SubmissionContext;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Committed(SubmissionStatus),
    /// Shutdown arrived before the commit; nothing was persisted and the
    /// artifacts written so far were removed. The processor records the
    /// error status for the already-claimed row.
    Cancelled,
}

/// Turns a fully validated context into its terminal state: renders the
/// status artifacts, commits the archive and status rows in one go, and
/// fans the outcome out to subscribers. Artifacts written before a failed
/// or cancelled commit are removed again.
pub struct Finalizer {
    store: ArtifactStore,
    archive: Arc<dyn SubmissionArchive>,
    notifier: Notifier,
    pdf: Option<Arc<dyn StatusPdfRenderer>>,
    spreadsheet: Option<Arc<dyn SpreadsheetRenderer>>,
    analytics: Option<Arc<dyn AnalyticsFeed>>,
}

impl Finalizer {
    pub fn new(store: ArtifactStore, archive: Arc<dyn SubmissionArchive>, notifier: Notifier) -> Self {
        Self {
            store,
            archive,
            notifier,
            pdf: None,
            spreadsheet: None,
            analytics: None,
        }
    }

    pub fn with_pdf_renderer(mut self, renderer: Arc<dyn StatusPdfRenderer>) -> Self {
        self.pdf = Some(renderer);
        self
    }

    pub fn with_spreadsheet_renderer(mut self, renderer: Arc<dyn SpreadsheetRenderer>) -> Self {
        self.spreadsheet = Some(renderer);
        self
    }

    pub fn with_analytics(mut self, feed: Arc<dyn AnalyticsFeed>) -> Self {
        self.analytics = Some(feed);
        self
    }

    pub async fn finalize(
        &self,
        ctx: &SubmissionContext,
        shutdown: &CancellationToken,
    ) -> Result<FinalizeOutcome> {
        let mut paths = ArtifactPaths {
            report: ctx.raw_document_path.clone(),
            ..Default::default()
        };

        match self.finalize_inner(ctx, shutdown, &mut paths).await {
            Ok(FinalizeOutcome::Committed(status)) => Ok(FinalizeOutcome::Committed(status)),
            Ok(FinalizeOutcome::Cancelled) => {
                paths.cleanup();
                Ok(FinalizeOutcome::Cancelled)
            }
            Err(err) => {
                paths.cleanup();
                Err(err)
            }
        }
    }

    async fn finalize_inner(
        &self,
        ctx: &SubmissionContext,
        shutdown: &CancellationToken,
        paths: &mut ArtifactPaths,
    ) -> Result<FinalizeOutcome> {
        let completed_at = Utc::now();
        let accepted = ctx.is_accepted();
        let period_info = ctx
            .period
            .as_ref()
            .map(|period| period.info.as_str())
            .unwrap_or(ctx.message.report_period.as_str());

        let report = StatusReport {
            token: ctx.token,
            report_code: ctx.message.report_code.clone(),
            report_period: period_info.to_string(),
            undertaking: ctx.message.undertaking.clone(),
            submitted_at: ctx.message.time_submitted,
            completed_at,
            accepted,
            findings: ctx.findings.clone(),
        };

        let stem = file_stem(
            &ctx.message.report_code,
            ctx.bank_code(),
            period_info,
            ctx.message.time_submitted,
            ctx.status_row_id,
        );

        if let Some(renderer) = &self.pdf {
            self.store.ensure_status_dir().await?;
            let path = self.store.pdf_path(&stem);
            renderer.render(&report, &path).await?;
            paths.pdf = Some(path);
        }

        paths.status_xml = Some(self.store.save_status_xml(&stem, &report).await?);

        if shutdown.is_cancelled() {
            return Ok(FinalizeOutcome::Cancelled);
        }

        let record = SubmissionRecord {
            token: ctx.token,
            bank_id: ctx.bank.as_ref().map(|bank| bank.id),
            report_version_id: ctx.version.as_ref().map(|version| version.id),
            period_start: ctx.period.as_ref().map(|period| period.start),
            period_end: ctx.period.as_ref().map(|period| period.end),
            accepted,
            submitted_at: ctx.message.time_submitted,
            completed_at,
            report_path: path_string(paths.report.as_ref()),
            pdf_path: path_string(paths.pdf.as_ref()),
            status_xml_path: path_string(paths.status_xml.as_ref()),
        };

        let submitted_report_id = self.archive.commit(&record).await?;

        let status = if accepted {
            SubmissionStatus::Accepted
        } else {
            SubmissionStatus::Rejected
        };

        tracing::info!(
            target: "reportsink::pipeline",
            event = "submission_committed",
            token = %ctx.token,
            status = status.code(),
            findings = ctx.findings.len(),
        );

        self.spawn_spreadsheet(ctx, &stem, submitted_report_id);

        let notification = SubmittedNotification {
            token: ctx.token,
            report_code: ctx.message.report_code.clone(),
            bank_code: ctx.bank.as_ref().map(|bank| bank.code.clone()),
            period: period_info.to_string(),
            status,
            submitted_report_id,
            completed_at,
        };

        // Only accepted documents reach the warehouse.
        if accepted {
            if let (Some(feed), Some(document)) = (self.analytics.clone(), ctx.document.clone()) {
                let notification = notification.clone();
                let token = ctx.token;
                tokio::spawn(async move {
                    if let Err(err) = feed.publish(document, &notification).await {
                        tracing::warn!(
                            target: "reportsink::pipeline",
                            event = "analytics_publish_failed",
                            token = %token,
                            error = %err,
                        );
                    }
                });
            }
        }

        self.notifier.publish(notification);

        Ok(FinalizeOutcome::Committed(status))
    }

    /// Spreadsheet rendering happens for any viewable document after the
    /// commit and off the consumer task; a failure here leaves the
    /// submission without a spreadsheet but does not touch its outcome.
    fn spawn_spreadsheet(
        &self,
        ctx: &SubmissionContext,
        stem: &str,
        submitted_report_id: Option<i64>,
    ) {
        let (Some(renderer), Some(document), Some(report_id)) = (
            self.spreadsheet.clone(),
            ctx.document.clone(),
            submitted_report_id,
        ) else {
            return;
        };
        if !document.is_viewable() {
            return;
        }

        let archive = self.archive.clone();
        let path = self.store.spreadsheet_path(stem);
        let token = ctx.token;
        tokio::spawn(async move {
            if let Err(err) = render_and_record(renderer, archive, document, path, report_id, token).await
            {
                tracing::warn!(
                    target: "reportsink::pipeline",
                    event = "spreadsheet_render_failed",
                    token = %token,
                    error = %err,
                );
            }
        });
    }
}

async fn render_and_record(
    renderer: Arc<dyn SpreadsheetRenderer>,
    archive: Arc<dyn SubmissionArchive>,
    document: Arc<dyn crate::engines::ReportDocument>,
    path: PathBuf,
    submitted_report_id: i64,
    token: Uuid,
) -> Result<()> {
    renderer.render(document, &path).await?;
    archive
        .record_spreadsheet(submitted_report_id, token, &path.to_string_lossy())
        .await?;
    Ok(())
}

fn path_string(path: Option<&PathBuf>) -> Option<String> {
    path.map(|path| path.to_string_lossy().into_owned())
}
