#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reportsink::archive::{SubmissionArchive, SubmissionRecord};
use reportsink::consumer::{QueueConsumer, SubmissionDelivery};
use reportsink::definitions::{DefinitionSource, FormulaDefinition, ReportDefinition};
use reportsink::engines::{
    AnalyticsFeed, DynamicFieldViolation, ReportDocument, SpreadsheetRenderer,
};
use reportsink::error::Result;
use reportsink::notify::SubmittedNotification;
use reportsink::period::{RecurrenceType, ReportingPeriod};
use reportsink::registry::{BankRecord, RegistrySource, ReportRecord, ReportVersionRecord};
use reportsink::status::SubmissionStatus;
use reportsink::status_store::{StatusInfo, StatusStore};
use reportsink::submission::context::{CertificateInfo, SubmissionMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const MONTHLY_NAMESPACE: &str = "http://schemas.reportsink.io/MonthlyReport/v02";

pub fn submitted_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 12, 5, 14, 30, 9).unwrap()
}

pub fn message(
    report_code: &str,
    report_period: &str,
    undertaking: &str,
    report_file: &str,
) -> SubmissionMessage {
    SubmissionMessage {
        report_code: report_code.to_string(),
        report_period: report_period.to_string(),
        undertaking: undertaking.to_string(),
        report_file: report_file.to_string(),
        time_submitted: submitted_at(),
    }
}

pub fn certificate(bank_code: &str) -> CertificateInfo {
    CertificateInfo {
        subject: format!("O=Example Bank, CN={bank_code}"),
        issuer: Some("CN=Reporting CA".to_string()),
        thumbprint: Some("AB12CD34".to_string()),
    }
}

/// In-memory registry with one monthly report (`FRP`, version 9), an
/// active bank `100001` and an inactive bank `100009`.
#[derive(Default)]
pub struct MockRegistry {
    pub banks: Vec<BankRecord>,
    pub reports: Vec<ReportRecord>,
    pub versions: HashMap<i32, ReportVersionRecord>,
}

impl MockRegistry {
    pub fn standard() -> Self {
        let mut versions = HashMap::new();
        versions.insert(
            3,
            ReportVersionRecord {
                id: 9,
                root_element: "MonthlyReport".to_string(),
                root_namespace: MONTHLY_NAMESPACE.to_string(),
            },
        );

        Self {
            banks: vec![
                BankRecord {
                    id: 1,
                    code: "100001".to_string(),
                    name: "Example Bank".to_string(),
                    active: true,
                },
                BankRecord {
                    id: 2,
                    code: "100009".to_string(),
                    name: "Dormant Bank".to_string(),
                    active: false,
                },
            ],
            reports: vec![ReportRecord {
                id: 3,
                code: "FRP".to_string(),
                recurrence: RecurrenceType::Monthly,
            }],
            versions,
        }
    }
}

#[async_trait]
impl RegistrySource for MockRegistry {
    async fn bank_by_code(&self, code: &str) -> Result<Option<BankRecord>> {
        Ok(self.banks.iter().find(|bank| bank.code == code).cloned())
    }

    async fn report_by_code(&self, code: &str) -> Result<Option<ReportRecord>> {
        Ok(self
            .reports
            .iter()
            .find(|report| report.code == code)
            .cloned())
    }

    async fn report_version(
        &self,
        report_id: i32,
        _period: &ReportingPeriod,
    ) -> Result<Option<ReportVersionRecord>> {
        Ok(self.versions.get(&report_id).cloned())
    }
}

pub struct MockStatusStore {
    rows: Mutex<HashMap<Uuid, StatusInfo>>,
    pub error_marks: AtomicUsize,
}

impl MockStatusStore {
    pub fn with_row(token: Uuid, status: SubmissionStatus) -> Self {
        let mut rows = HashMap::new();
        rows.insert(
            token,
            StatusInfo {
                id: 42,
                token,
                status,
                submitted_at: submitted_at(),
            },
        );
        Self {
            rows: Mutex::new(rows),
            error_marks: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            error_marks: AtomicUsize::new(0),
        }
    }

    pub fn status_of(&self, token: Uuid) -> Option<SubmissionStatus> {
        self.rows
            .lock()
            .unwrap()
            .get(&token)
            .map(|info| info.status)
    }
}

#[async_trait]
impl StatusStore for MockStatusStore {
    async fn find(&self, token: Uuid) -> Result<Option<StatusInfo>> {
        Ok(self.rows.lock().unwrap().get(&token).cloned())
    }

    async fn begin_processing(&self, token: Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&token) {
            Some(info) if info.status == SubmissionStatus::InQueue => {
                info.status = SubmissionStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_error(&self, token: Uuid) -> Result<()> {
        self.error_marks.fetch_add(1, Ordering::SeqCst);
        if let Some(info) = self.rows.lock().unwrap().get_mut(&token) {
            info.status = SubmissionStatus::Error;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockArchive {
    pub commits: Mutex<Vec<SubmissionRecord>>,
    pub fail_commit: AtomicBool,
    pub spreadsheets: Mutex<Vec<(i64, String)>>,
}

impl MockArchive {
    pub fn failing() -> Self {
        let archive = Self::default();
        archive.fail_commit.store(true, Ordering::SeqCst);
        archive
    }
}

#[async_trait]
impl SubmissionArchive for MockArchive {
    async fn commit(&self, record: &SubmissionRecord) -> Result<Option<i64>> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(reportsink::err!("archive unavailable"));
        }

        let has_identity = record.bank_id.is_some()
            && record.report_version_id.is_some()
            && record.period_start.is_some()
            && record.period_end.is_some();

        self.commits.lock().unwrap().push(record.clone());
        Ok(has_identity.then_some(4242))
    }

    async fn record_spreadsheet(
        &self,
        submitted_report_id: i64,
        _token: Uuid,
        path: &str,
    ) -> Result<()> {
        self.spreadsheets
            .lock()
            .unwrap()
            .push((submitted_report_id, path.to_string()));
        Ok(())
    }
}

/// Definition source with a build counter, an optional artificial delay
/// and a failure switch.
pub struct MockDefinitionSource {
    pub formulas: Vec<FormulaDefinition>,
    pub builds: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Duration,
}

impl MockDefinitionSource {
    pub fn empty() -> Self {
        Self {
            formulas: Vec::new(),
            builds: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    pub fn with_formulas(formulas: Vec<FormulaDefinition>) -> Self {
        Self {
            formulas,
            ..Self::empty()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::empty()
        }
    }
}

#[async_trait]
impl DefinitionSource for MockDefinitionSource {
    async fn load(&self, report_version_id: i32) -> Result<ReportDefinition> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.builds.fetch_add(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(reportsink::err!("definition source unavailable"));
        }

        Ok(ReportDefinition {
            report_version_id,
            formulas: self.formulas.clone(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockDocument {
    pub root_name: String,
    pub root_namespace: String,
    pub header_year: Option<i32>,
    pub header_period: Option<String>,
    pub header_undertaking: Option<String>,
    pub forms: Vec<String>,
    pub viewable: bool,
    pub violations: Vec<(String, String)>,
    pub values: HashMap<String, f64>,
}

impl ReportDocument for MockDocument {
    fn root_name(&self) -> &str {
        &self.root_name
    }

    fn root_namespace(&self) -> &str {
        &self.root_namespace
    }

    fn header_year(&self) -> Option<i32> {
        self.header_year
    }

    fn header_period(&self) -> Option<String> {
        self.header_period.clone()
    }

    fn header_undertaking(&self) -> Option<String> {
        self.header_undertaking.clone()
    }

    fn reported_forms(&self) -> Vec<String> {
        self.forms.clone()
    }

    fn is_viewable(&self) -> bool {
        self.viewable
    }

    fn dynamic_field_violations(&self) -> Vec<DynamicFieldViolation> {
        self.violations
            .iter()
            .map(|(field, detail)| DynamicFieldViolation {
                field: field.clone(),
                detail: detail.clone(),
            })
            .collect()
    }

    fn field_value(&self, reference: &str) -> Option<f64> {
        self.values.get(reference).copied()
    }
}

#[derive(Default)]
pub struct MockSpreadsheetRenderer {
    pub rendered: Mutex<Vec<String>>,
}

#[async_trait]
impl SpreadsheetRenderer for MockSpreadsheetRenderer {
    async fn render(&self, _document: Arc<dyn ReportDocument>, path: &std::path::Path) -> Result<()> {
        self.rendered
            .lock()
            .unwrap()
            .push(path.to_string_lossy().into_owned());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockAnalyticsFeed {
    pub published: Mutex<Vec<(Vec<String>, SubmittedNotification)>>,
}

#[async_trait]
impl AnalyticsFeed for MockAnalyticsFeed {
    async fn publish(
        &self,
        document: Arc<dyn ReportDocument>,
        notification: &SubmittedNotification,
    ) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((document.reported_forms(), notification.clone()));
        Ok(())
    }
}

pub struct MockQueueConsumer {
    deliveries: Mutex<VecDeque<SubmissionDelivery>>,
    pub acks: Arc<Mutex<Vec<u64>>>,
}

impl MockQueueConsumer {
    pub fn with_deliveries(deliveries: Vec<SubmissionDelivery>) -> Self {
        Self {
            deliveries: Mutex::new(deliveries.into()),
            acks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl QueueConsumer for MockQueueConsumer {
    async fn next_delivery(&mut self) -> Result<Option<SubmissionDelivery>> {
        Ok(self.deliveries.lock().unwrap().pop_front())
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        self.acks.lock().unwrap().push(delivery_tag);
        Ok(())
    }
}
