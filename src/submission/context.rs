use crate::engines::ReportDocument;
use crate::finding::{Finding, Severity};
use crate::period::ReportingPeriod;
use crate::registry::{BankRecord, ReportRecord, ReportVersionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Transport header names carried alongside a queued submission.
pub mod headers {
    pub const TOKEN: &str = "Token";
    pub const SUBJECT: &str = "Subject";
    pub const ISSUER: &str = "Issuer";
    pub const THUMBPRINT: &str = "Thumbprint";
}

/// Body of a queued submission message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionMessage {
    pub report_code: String,
    pub report_period: String,
    /// Bank code the sender claims to submit for.
    pub undertaking: String,
    /// Base64-encoded report payload.
    pub report_file: String,
    pub time_submitted: DateTime<Utc>,
}

/// Identity of the client certificate the submission arrived under.
#[derive(Debug, Clone, Default)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: Option<String>,
    pub thumbprint: Option<String>,
}

/// Mutable state threaded through the validation stages.
///
/// The three validity flags start out true and only ever flip to false;
/// findings are only ever appended. A submission is accepted exactly when
/// all three flags survive the chain.
pub struct SubmissionContext {
    pub token: Uuid,
    pub status_row_id: i64,
    pub message: SubmissionMessage,
    pub certificate: CertificateInfo,
    pub received_at: DateTime<Utc>,

    /// Present until the extraction stage releases it.
    pub encoded_payload: Option<String>,
    pub raw_document: Option<Vec<u8>>,
    pub raw_document_path: Option<PathBuf>,
    pub document: Option<Arc<dyn ReportDocument>>,

    pub bank: Option<BankRecord>,
    pub report: Option<ReportRecord>,
    pub version: Option<ReportVersionRecord>,
    pub period: Option<ReportingPeriod>,
    /// Reported forms plus the sub-forms they expand to.
    pub expanded_forms: Vec<String>,

    pub model_valid: bool,
    pub file_valid: bool,
    pub report_valid: bool,
    pub findings: Vec<Finding>,
}

impl SubmissionContext {
    pub fn new(
        token: Uuid,
        status_row_id: i64,
        message: SubmissionMessage,
        certificate: CertificateInfo,
    ) -> Self {
        let encoded_payload = Some(message.report_file.clone());
        Self {
            token,
            status_row_id,
            message,
            certificate,
            received_at: Utc::now(),
            encoded_payload,
            raw_document: None,
            raw_document_path: None,
            document: None,
            bank: None,
            report: None,
            version: None,
            period: None,
            expanded_forms: Vec::new(),
            model_valid: true,
            file_valid: true,
            report_valid: true,
            findings: Vec::new(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.model_valid && self.file_valid && self.report_valid
    }

    pub fn add_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// Records a metadata failure: the declared identity could not be
    /// resolved.
    pub fn fail_model(&mut self, finding: Finding) {
        self.model_valid = false;
        self.add_finding(finding);
    }

    /// Records a payload failure: the file itself is unusable or violates
    /// its schema.
    pub fn fail_file(&mut self, finding: Finding) {
        self.file_valid = false;
        self.add_finding(finding);
    }

    /// Records a content failure. Warnings are kept as findings without
    /// rejecting the report.
    pub fn fail_report(&mut self, finding: Finding) {
        if finding.severity == Severity::Error {
            self.report_valid = false;
        }
        self.add_finding(finding);
    }

    /// Bank code for artifact naming; falls back to the declared
    /// undertaking when the bank never resolved.
    pub fn bank_code(&self) -> &str {
        self.bank
            .as_ref()
            .map(|bank| bank.code.as_str())
            .unwrap_or(&self.message.undertaking)
    }
}
