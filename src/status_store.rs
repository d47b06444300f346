//! Access to the submission status row that tracks a submission from queue
//! entry to its terminal state.

use crate::error::Result;
use crate::status::{DataProcessingStatus, SubmissionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub id: i64,
    pub token: Uuid,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn find(&self, token: Uuid) -> Result<Option<StatusInfo>>;

    /// Conditional in-queue→processing transition. Returns `false` when the
    /// row was not in the in-queue state, which means another worker (or an
    /// earlier delivery of the same message) already claimed it.
    async fn begin_processing(&self, token: Uuid) -> Result<bool>;

    /// Last-resort terminal write when the pipeline itself failed.
    async fn mark_error(&self, token: Uuid) -> Result<()>;
}

pub struct SqlStatusStore {
    pool: PgPool,
}

impl SqlStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    id: i64,
    token: Uuid,
    submission_status: String,
    submitted_at: DateTime<Utc>,
}

#[async_trait]
impl StatusStore for SqlStatusStore {
    async fn find(&self, token: Uuid) -> Result<Option<StatusInfo>> {
        let row: Option<StatusRow> = sqlx::query_as(
            "SELECT id, token, submission_status, submitted_at \
             FROM report_status WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status = SubmissionStatus::from_code(&row.submission_status).ok_or_else(|| {
            crate::err!(
                "status row for token {} carries unknown status code `{}`",
                row.token,
                row.submission_status
            )
        })?;

        Ok(Some(StatusInfo {
            id: row.id,
            token: row.token,
            status,
            submitted_at: row.submitted_at,
        }))
    }

    async fn begin_processing(&self, token: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE report_status \
             SET submission_status = $1, status_changed_at = NOW() \
             WHERE token = $2 AND submission_status = $3",
        )
        .bind(SubmissionStatus::Processing.code())
        .bind(token)
        .bind(SubmissionStatus::InQueue.code())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_error(&self, token: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE report_status \
             SET submission_status = $1, data_processing_status = $2, status_changed_at = NOW() \
             WHERE token = $3",
        )
        .bind(SubmissionStatus::Error.code())
        .bind(DataProcessingStatus::NotApplicable.code())
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
