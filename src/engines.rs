//! Seams for the collaborators that live outside this service: the report
//! model engine, the formula interpreter, template expansion, and the
//! artifact renderers. The pipeline only depends on these traits; the
//! binary wires the built-in implementations from `model`, and the heavier
//! engines can be plugged in without touching the stages.

use crate::artifacts::StatusReport;
use crate::error::Result;
use crate::finding::Severity;
use crate::notify::SubmittedNotification;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Result of evaluating one side of a validation formula.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Null,
}

impl FormulaValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FormulaValue::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FormulaValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            FormulaValue::Boolean(value) => *value,
            FormulaValue::Number(value) => *value != 0.0,
            _ => false,
        }
    }

    /// The boolean a condition formula produced, if it produced one.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FormulaValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for FormulaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaValue::Null => f.write_str("NULL"),
            FormulaValue::Number(value) => f.write_str(&format_grouped(*value)),
            FormulaValue::Text(value) => f.write_str(value),
            FormulaValue::Boolean(value) => write!(f, "{value}"),
        }
    }
}

/// Formats a decimal with two fraction digits and thousands separators,
/// matching the figures shown in status documents.
pub fn format_grouped(value: f64) -> String {
    let raw = format!("{value:.2}");
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw.as_str()),
    };
    let (integral, fraction) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(integral.len() + integral.len() / 3);
    for (index, ch) in integral.chars().enumerate() {
        if index > 0 && (integral.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{sign}{grouped}.{fraction}")
}

/// One message produced while validating a document against its schema.
#[derive(Debug, Clone)]
pub struct SchemaDiagnostic {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DynamicFieldViolation {
    pub field: String,
    pub detail: String,
}

/// A parsed report payload as the pipeline sees it.
pub trait ReportDocument: Send + Sync {
    fn root_name(&self) -> &str;
    fn root_namespace(&self) -> &str;
    fn header_year(&self) -> Option<i32>;
    fn header_period(&self) -> Option<String>;
    fn header_undertaking(&self) -> Option<String>;
    /// Codes of the forms (templates) actually filled in.
    fn reported_forms(&self) -> Vec<String>;
    /// Whether the document can be rendered into a spreadsheet.
    fn is_viewable(&self) -> bool;
    fn dynamic_field_violations(&self) -> Vec<DynamicFieldViolation>;
    /// Numeric value of a field referenced from a formula, if present.
    fn field_value(&self, reference: &str) -> Option<f64>;
}

/// Output of parsing and schema-validating a payload. `document` is absent
/// when the payload is not well-formed XML.
pub struct ParseOutcome {
    pub document: Option<Arc<dyn ReportDocument>>,
    pub diagnostics: Vec<SchemaDiagnostic>,
}

#[async_trait]
pub trait ReportModelEngine: Send + Sync {
    async fn parse(&self, content: &[u8], report_version_id: i32) -> Result<ParseOutcome>;
}

#[async_trait]
pub trait FormulaEvaluator: Send + Sync {
    async fn evaluate(&self, document: &dyn ReportDocument, formula: &str)
        -> Result<FormulaValue>;
}

/// Expands the reported forms with the sub-forms they imply, so formula
/// applicability sees the full set.
#[async_trait]
pub trait TemplateRequirementSource: Send + Sync {
    async fn expand_forms(
        &self,
        report_version_id: i32,
        reported_forms: &[String],
    ) -> Result<Vec<String>>;
}

#[async_trait]
pub trait StatusPdfRenderer: Send + Sync {
    async fn render(&self, report: &StatusReport, path: &Path) -> Result<()>;
}

#[async_trait]
pub trait SpreadsheetRenderer: Send + Sync {
    async fn render(&self, document: Arc<dyn ReportDocument>, path: &Path) -> Result<()>;
}

/// Receives the parsed document of an accepted submission after its
/// commit, for the downstream warehouse.
#[async_trait]
pub trait AnalyticsFeed: Send + Sync {
    async fn publish(
        &self,
        document: Arc<dyn ReportDocument>,
        notification: &SubmittedNotification,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouped_formatting() {
        assert_eq!(format_grouped(0.0), "0.00");
        assert_eq!(format_grouped(1234.5), "1,234.50");
        assert_eq!(format_grouped(-1234567.891), "-1,234,567.89");
        assert_eq!(format_grouped(999.999), "1,000.00");
    }

    #[test]
    fn null_displays_as_marker() {
        assert_eq!(FormulaValue::Null.to_string(), "NULL");
        assert!(!FormulaValue::Null.is_truthy());
        assert!(FormulaValue::Boolean(true).is_truthy());
    }
}
