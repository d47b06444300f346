use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "WARN",
            Severity::Error => "ERR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation finding attached to a submission. Findings are only ever
/// appended while a submission is processed; no stage removes or rewrites
/// an earlier finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub code: String,
    pub description: String,
    pub additional_description: Option<String>,
    pub severity: Severity,
    /// The formula expression, for findings raised by formula checks.
    pub formula: Option<String>,
    /// User-friendly rendering of the formula, if one is defined.
    pub formula_description: Option<String>,
    /// Evaluated left/right values in comparison form.
    pub formula_result: Option<String>,
    /// Which templates fed the two sides of the comparison.
    pub formula_source: Option<String>,
}

impl Finding {
    pub fn error(code: &str, description: impl Into<String>) -> Self {
        Self::new(code, description, Severity::Error)
    }

    pub fn warning(code: &str, description: impl Into<String>) -> Self {
        Self::new(code, description, Severity::Warning)
    }

    pub fn new(code: &str, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: code.to_string(),
            description: description.into(),
            additional_description: None,
            severity,
            formula: None,
            formula_description: None,
            formula_result: None,
            formula_source: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.additional_description = Some(details.into());
        self
    }

    /// Description with the additional detail folded in, as shown in the
    /// generated status documents.
    pub fn full_description(&self) -> String {
        match self.additional_description.as_deref() {
            Some(extra) if !extra.trim().is_empty() => {
                format!("{} - {}", self.description, extra)
            }
            _ => self.description.clone(),
        }
    }
}

/// Well-known finding codes.
pub mod codes {
    pub const BASE64_DECODE_ERROR: &str = "DATA-0001";
    pub const ARCHIVE_ENTRY_COUNT_ERROR: &str = "DATA-0002";
    pub const ARCHIVE_CORRUPTED_ERROR: &str = "DATA-0003";

    pub const BANK_NOT_SPECIFIED: &str = "META-0001";
    pub const BANK_NOT_FOUND: &str = "META-0002";
    pub const BANK_NOT_ALLOWED: &str = "META-0003";
    pub const REPORT_NOT_FOUND: &str = "META-0004";
    pub const REPORT_PERIOD_FORMAT_INVALID: &str = "META-0005";
    pub const REPORT_VERSION_NOT_FOUND: &str = "META-0006";
    pub const BANK_NOT_ACTIVE: &str = "META-0007";

    pub const SCHEMA_ERROR: &str = "XSD-0001";
    pub const SCHEMA_WARNING: &str = "XSD-0002";
    pub const INVALID_ROOT_TAG: &str = "XSD-0003";
    pub const INVALID_ROOT_NAMESPACE: &str = "XSD-0004";
    pub const INVALID_XML_STRUCTURE: &str = "XSD-0005";

    pub const HEADER_YEAR_MISMATCH: &str = "XML-0001";
    pub const HEADER_PERIOD_MISMATCH: &str = "XML-0002";
    pub const HEADER_UNDERTAKING_MISMATCH: &str = "XML-0003";

    pub const DYNAMIC_FIELD_ERROR: &str = "DYN-0001";

    pub const VALIDATION_FAILED: &str = "VAL-ERR";
}

/// Descriptions for findings the pipeline raises itself (formula findings
/// carry descriptions from their definitions).
pub mod descriptions {
    pub const BASE64_DECODE_ERROR: &str = "Submitted report data is not valid BASE64 encoded data";
    pub const ARCHIVE_ENTRY_COUNT_ERROR: &str =
        "ZIPed report data does not contain exactly one entry";
    pub const ARCHIVE_CORRUPTED_ERROR: &str = "ZIPed report data archive cannot be extracted";
}
