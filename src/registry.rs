//! Lookups against the reporting registry: banks, reports and report
//! versions.

use crate::error::Result;
use crate::period::{RecurrenceType, ReportingPeriod};
use async_trait::async_trait;
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankRecord {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    pub id: i32,
    pub code: String,
    pub recurrence: RecurrenceType,
}

/// A report version valid for a concrete period, together with the root
/// element its documents must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportVersionRecord {
    pub id: i32,
    pub root_element: String,
    pub root_namespace: String,
}

#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn bank_by_code(&self, code: &str) -> Result<Option<BankRecord>>;

    async fn report_by_code(&self, code: &str) -> Result<Option<ReportRecord>>;

    /// The version of a report that was in force for the given period.
    async fn report_version(
        &self,
        report_id: i32,
        period: &ReportingPeriod,
    ) -> Result<Option<ReportVersionRecord>>;
}

pub struct SqlRegistrySource {
    pool: PgPool,
}

impl SqlRegistrySource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BankRow {
    id: i32,
    code: String,
    name: String,
    active: bool,
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: i32,
    code: String,
    recurrence_type: String,
}

#[derive(sqlx::FromRow)]
struct ReportVersionRow {
    id: i32,
    root_element: String,
    root_namespace: String,
}

#[async_trait]
impl RegistrySource for SqlRegistrySource {
    async fn bank_by_code(&self, code: &str) -> Result<Option<BankRecord>> {
        let row: Option<BankRow> =
            sqlx::query_as("SELECT id, code, name, active FROM bank WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|bank| BankRecord {
            id: bank.id,
            code: bank.code,
            name: bank.name,
            active: bank.active,
        }))
    }

    async fn report_by_code(&self, code: &str) -> Result<Option<ReportRecord>> {
        let row: Option<ReportRow> =
            sqlx::query_as("SELECT id, code, recurrence_type FROM report WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        let Some(report) = row else {
            return Ok(None);
        };

        let recurrence = report
            .recurrence_type
            .chars()
            .next()
            .and_then(RecurrenceType::from_char)
            .ok_or_else(|| {
                crate::err!(
                    "report `{}` has unsupported recurrence type `{}`",
                    report.code,
                    report.recurrence_type
                )
            })?;

        Ok(Some(ReportRecord {
            id: report.id,
            code: report.code,
            recurrence,
        }))
    }

    async fn report_version(
        &self,
        report_id: i32,
        period: &ReportingPeriod,
    ) -> Result<Option<ReportVersionRecord>> {
        let row: Option<ReportVersionRow> = sqlx::query_as(
            "SELECT id, root_element, root_namespace \
             FROM report_version \
             WHERE report_id = $1 \
               AND valid_from <= $2 \
               AND (valid_to IS NULL OR valid_to >= $3) \
             ORDER BY valid_from DESC \
             LIMIT 1",
        )
        .bind(report_id)
        .bind(period.start)
        .bind(period.end)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|version| ReportVersionRecord {
            id: version.id,
            root_element: version.root_element,
            root_namespace: version.root_namespace,
        }))
    }
}
