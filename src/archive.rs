//! Terminal persistence of a processed submission: the archive row, the
//! supersede rule for resubmissions, and the status row flip, all inside a
//! single transaction.

use crate::error::Result;
use crate::status::{ArchivedReportStatus, DataProcessingStatus, SubmissionStatus};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// What gets written when a submission reaches its terminal state.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub token: Uuid,
    pub bank_id: Option<i32>,
    pub report_version_id: Option<i32>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub accepted: bool,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub report_path: Option<String>,
    pub pdf_path: Option<String>,
    pub status_xml_path: Option<String>,
}

#[async_trait]
pub trait SubmissionArchive: Send + Sync {
    /// Commits the terminal state atomically: an accepted record supersedes
    /// any prior accepted record for the same version, bank and period
    /// (flipping it to resubmitted), the archive row is inserted, and the
    /// status row moves to its terminal status with the artifact paths.
    /// Returns the archive row id when one was written.
    async fn commit(&self, record: &SubmissionRecord) -> Result<Option<i64>>;

    /// Records the spreadsheet path once the deferred rendering finishes.
    async fn record_spreadsheet(
        &self,
        submitted_report_id: i64,
        token: Uuid,
        path: &str,
    ) -> Result<()>;
}

pub struct SqlSubmissionArchive {
    pool: PgPool,
}

impl SqlSubmissionArchive {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionArchive for SqlSubmissionArchive {
    async fn commit(&self, record: &SubmissionRecord) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let identity = match (
            record.bank_id,
            record.report_version_id,
            record.period_start,
            record.period_end,
        ) {
            (Some(bank_id), Some(version_id), Some(start), Some(end)) => {
                Some((bank_id, version_id, start, end))
            }
            // Submissions rejected before their metadata resolved have no
            // archive identity; only the status row is written.
            _ => None,
        };

        let mut submitted_report_id = None;

        if let Some((bank_id, version_id, start, end)) = identity {
            if record.accepted {
                sqlx::query(
                    "UPDATE submitted_report SET status = $1 \
                     WHERE report_version_id = $2 AND bank_id = $3 \
                       AND period_start = $4 AND period_end = $5 \
                       AND status = $6",
                )
                .bind(ArchivedReportStatus::Resubmitted.as_str())
                .bind(version_id)
                .bind(bank_id)
                .bind(start)
                .bind(end)
                .bind(ArchivedReportStatus::Accepted.as_str())
                .execute(&mut *tx)
                .await?;
            }

            let status = if record.accepted {
                ArchivedReportStatus::Accepted
            } else {
                ArchivedReportStatus::Rejected
            };

            let (id,): (i64,) = sqlx::query_as(
                "INSERT INTO submitted_report \
                   (token, report_version_id, bank_id, period_start, period_end, \
                    status, submitted_at, completed_at, report_path) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 RETURNING id",
            )
            .bind(record.token)
            .bind(version_id)
            .bind(bank_id)
            .bind(start)
            .bind(end)
            .bind(status.as_str())
            .bind(record.submitted_at)
            .bind(record.completed_at)
            .bind(record.report_path.as_deref())
            .fetch_one(&mut *tx)
            .await?;

            submitted_report_id = Some(id);
        }

        let terminal = if record.accepted {
            SubmissionStatus::Accepted
        } else {
            SubmissionStatus::Rejected
        };

        sqlx::query(
            "UPDATE report_status \
             SET submission_status = $1, data_processing_status = $2, \
                 status_changed_at = $3, report_file_path = $4, \
                 pdf_file_path = $5, xml_file_path = $6 \
             WHERE token = $7",
        )
        .bind(terminal.code())
        .bind(DataProcessingStatus::NotApplicable.code())
        .bind(record.completed_at)
        .bind(record.report_path.as_deref())
        .bind(record.pdf_path.as_deref())
        .bind(record.status_xml_path.as_deref())
        .bind(record.token)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(submitted_report_id)
    }

    async fn record_spreadsheet(
        &self,
        submitted_report_id: i64,
        token: Uuid,
        path: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE submitted_report SET spreadsheet_path = $1 WHERE id = $2")
            .bind(path)
            .bind(submitted_report_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE report_status SET spreadsheet_file_path = $1 WHERE token = $2")
            .bind(path)
            .bind(token)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}
