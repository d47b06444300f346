//! Artifact naming and generation: every submission leaves behind the raw
//! report document plus a PDF and a machine-readable XML rendering of the
//! validation outcome, all sharing one deterministic file stem.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::finding::Finding;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RESULT_NAMESPACE: &str = "http://schemas.reportsink.io/SubmissionResult/v01";

/// Everything the status documents need to describe an outcome.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub token: Uuid,
    pub report_code: String,
    pub report_period: String,
    pub undertaking: String,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub accepted: bool,
    pub findings: Vec<Finding>,
}

/// Shared stem for all artifacts of one submission:
/// `{report}_{bank}_{period}_{timestamp}_{status row id}` with dashes in
/// the period flattened to underscores.
pub fn file_stem(
    report_code: &str,
    bank_code: &str,
    period_info: &str,
    submitted_at: DateTime<Utc>,
    status_row_id: i64,
) -> String {
    format!(
        "{}_{}_{}_{}_{}",
        report_code,
        bank_code,
        period_info.replace('-', "_"),
        submitted_at.format("%Y%m%dT%H%M%S"),
        status_row_id,
    )
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    report_dir: PathBuf,
    status_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            report_dir: PathBuf::from(&config.report_dir),
            status_dir: PathBuf::from(&config.status_dir),
        }
    }

    pub fn report_path(&self, stem: &str) -> PathBuf {
        self.report_dir.join(format!("{stem}.xml"))
    }

    pub fn spreadsheet_path(&self, stem: &str) -> PathBuf {
        self.report_dir.join(format!("{stem}.xlsx"))
    }

    pub fn pdf_path(&self, stem: &str) -> PathBuf {
        self.status_dir.join(format!("{stem}.pdf"))
    }

    pub fn status_xml_path(&self, stem: &str) -> PathBuf {
        self.status_dir.join(format!("{stem}_result.xml"))
    }

    pub async fn save_report(&self, stem: &str, content: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.report_dir).await?;
        let path = self.report_path(stem);
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    pub async fn save_status_xml(&self, stem: &str, report: &StatusReport) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.status_dir).await?;
        let path = self.status_xml_path(stem);
        let content = render_status_xml(report)?;
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    pub async fn ensure_status_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.status_dir).await?;
        Ok(())
    }
}

/// Paths produced so far for one submission. On a failed commit each one is
/// removed on its own so a single failing delete cannot strand the rest.
#[derive(Debug, Clone, Default)]
pub struct ArtifactPaths {
    pub report: Option<PathBuf>,
    pub pdf: Option<PathBuf>,
    pub status_xml: Option<PathBuf>,
}

impl ArtifactPaths {
    pub fn cleanup(&self) {
        remove_quietly(self.report.as_deref());
        remove_quietly(self.pdf.as_deref());
        remove_quietly(self.status_xml.as_deref());
    }
}

fn remove_quietly(path: Option<&Path>) {
    let Some(path) = path else {
        return;
    };
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(
                target: "reportsink::artifacts",
                event = "artifact_cleanup_failed",
                path = %path.display(),
                error = %err,
            );
        }
    }
}

/// Renders the machine-readable submission result document.
pub fn render_status_xml(report: &StatusReport) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new("SubmissionResult");
    root.push_attribute(("xmlns", RESULT_NAMESPACE));
    writer.write_event(Event::Start(root))?;

    writer.write_event(Event::Start(BytesStart::new("SubmissionInfo")))?;
    write_text_element(&mut writer, "SubmissionToken", &report.token.to_string())?;
    write_text_element(&mut writer, "ReportCode", &report.report_code)?;
    write_text_element(&mut writer, "ReportPeriod", &report.report_period)?;
    write_text_element(&mut writer, "Undertaking", &report.undertaking)?;
    write_text_element(
        &mut writer,
        "SubmissionTime",
        &report.submitted_at.to_rfc3339(),
    )?;
    write_text_element(
        &mut writer,
        "ResponseTime",
        &report.completed_at.to_rfc3339(),
    )?;
    write_text_element(
        &mut writer,
        "SubmissionStatus",
        if report.accepted { "ACPT" } else { "RJCT" },
    )?;
    writer.write_event(Event::End(BytesEnd::new("SubmissionInfo")))?;

    writer.write_event(Event::Start(BytesStart::new("ProcessingResult")))?;
    for finding in &report.findings {
        writer.write_event(Event::Start(BytesStart::new("ValidationRule")))?;
        write_text_element(&mut writer, "Id", &finding.code)?;
        write_text_element(&mut writer, "Desc", &finding.full_description())?;
        if let Some(formula) = finding.formula.as_deref() {
            write_text_element(&mut writer, "Formula", formula)?;
        }
        if let Some(description) = finding.formula_description.as_deref() {
            write_text_element(&mut writer, "FormulaDesc", description)?;
        }
        if let Some(result) = finding.formula_result.as_deref() {
            write_text_element(&mut writer, "FormulaResult", result)?;
        }
        write_text_element(&mut writer, "Severity", finding.severity.as_str())?;
        writer.write_event(Event::End(BytesEnd::new("ValidationRule")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("ProcessingResult")))?;

    writer.write_event(Event::End(BytesEnd::new("SubmissionResult")))?;

    Ok(writer.into_inner())
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_flattens_period_dashes() {
        let submitted = DateTime::parse_from_rfc3339("2017-12-05T14:30:09Z")
            .unwrap()
            .with_timezone(&Utc);
        let stem = file_stem("FRP", "100001", "2017-12", submitted, 42);
        assert_eq!(stem, "FRP_100001_2017_12_20171205T143009_42");
    }
}
