//! Built-in implementations of the engine seams: a quick-xml document
//! reader, a small arithmetic formula evaluator and a single-page PDF
//! status renderer. They cover the wiring of the binary; a full
//! schema-validating model engine or formula grammar can replace them
//! through the `engines` traits.

use crate::artifacts::StatusReport;
use crate::engines::{
    DynamicFieldViolation, FormulaEvaluator, FormulaValue, ParseOutcome, ReportDocument,
    ReportModelEngine, StatusPdfRenderer, TemplateRequirementSource,
};
use crate::error::Result;
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const HEADER_ELEMENT: &str = "Header";

/// Report document backed by a single pass over the XML payload. Forms are
/// the root's child elements besides the header; numeric leaf values are
/// indexed as `Form:Field` for formula references.
pub struct ParsedReportDocument {
    root_name: String,
    root_namespace: String,
    header: HashMap<String, String>,
    forms: Vec<String>,
    fields: HashMap<String, f64>,
}

impl ReportDocument for ParsedReportDocument {
    fn root_name(&self) -> &str {
        &self.root_name
    }

    fn root_namespace(&self) -> &str {
        &self.root_namespace
    }

    fn header_year(&self) -> Option<i32> {
        self.header.get("Year").and_then(|value| value.parse().ok())
    }

    fn header_period(&self) -> Option<String> {
        self.header.get("Period").cloned()
    }

    fn header_undertaking(&self) -> Option<String> {
        self.header.get("Undertaking").cloned()
    }

    fn reported_forms(&self) -> Vec<String> {
        self.forms.clone()
    }

    fn is_viewable(&self) -> bool {
        true
    }

    fn dynamic_field_violations(&self) -> Vec<DynamicFieldViolation> {
        // Dynamic field constraints come from the full model engine; the
        // built-in reader has no mapping data to check against.
        Vec::new()
    }

    fn field_value(&self, reference: &str) -> Option<f64> {
        self.fields.get(reference).copied()
    }
}

/// Parses report payloads without an XSD; schema diagnostics stay empty and
/// only well-formedness can fail.
#[derive(Debug, Default)]
pub struct QuickXmlModelEngine;

impl QuickXmlModelEngine {
    fn read(content: &[u8]) -> Option<ParsedReportDocument> {
        let mut reader = Reader::from_reader(content);
        reader.config_mut().trim_text(true);

        let mut root_name = None;
        let mut root_namespace = String::new();
        let mut header = HashMap::new();
        let mut forms: Vec<String> = Vec::new();
        let mut fields = HashMap::new();
        let mut stack: Vec<String> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();

                    if root_name.is_none() {
                        for attribute in start.attributes().flatten() {
                            if attribute.key.as_ref() == b"xmlns" {
                                root_namespace =
                                    String::from_utf8_lossy(&attribute.value).into_owned();
                            }
                        }
                        root_name = Some(name.clone());
                    } else if stack.len() == 1
                        && name != HEADER_ELEMENT
                        && !forms.contains(&name)
                    {
                        forms.push(name.clone());
                    }

                    stack.push(name);
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(text)) => {
                    let Ok(value) = text.unescape() else {
                        return None;
                    };
                    let value = value.trim().to_string();
                    if value.is_empty() {
                        continue;
                    }

                    if stack.len() == 3 && stack[1] == HEADER_ELEMENT {
                        header.entry(stack[2].clone()).or_insert(value);
                    } else if stack.len() >= 3 && stack[1] != HEADER_ELEMENT {
                        if let Ok(number) = value.parse::<f64>() {
                            let key = format!("{}:{}", stack[1], stack[stack.len() - 1]);
                            fields.entry(key).or_insert(number);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(_) => return None,
            }
        }

        // A document that closes more elements than it opens is malformed
        // even if the reader tolerated it.
        if !stack.is_empty() {
            return None;
        }

        root_name.map(|root_name| ParsedReportDocument {
            root_name,
            root_namespace,
            header,
            forms,
            fields,
        })
    }
}

#[async_trait]
impl ReportModelEngine for QuickXmlModelEngine {
    async fn parse(&self, content: &[u8], _report_version_id: i32) -> Result<ParseOutcome> {
        let document = Self::read(content)
            .map(|document| Arc::new(document) as Arc<dyn ReportDocument>);
        Ok(ParseOutcome {
            document,
            diagnostics: Vec::new(),
        })
    }
}

/// Evaluates arithmetic over numeric literals and `[Form:Field]` references
/// with an optional single comparison at the top level. A reference to a
/// field the document does not carry makes the whole expression null.
#[derive(Debug, Default)]
pub struct BasicFormulaEvaluator;

#[async_trait]
impl FormulaEvaluator for BasicFormulaEvaluator {
    async fn evaluate(
        &self,
        document: &dyn ReportDocument,
        formula: &str,
    ) -> Result<FormulaValue> {
        let mut parser = ExpressionParser::new(formula, document);
        let value = parser.comparison()?;
        parser.expect_end()?;
        Ok(value)
    }
}

struct ExpressionParser<'a> {
    input: &'a [u8],
    position: usize,
    document: &'a dyn ReportDocument,
}

impl<'a> ExpressionParser<'a> {
    fn new(input: &'a str, document: &'a dyn ReportDocument) -> Self {
        Self {
            input: input.as_bytes(),
            position: 0,
            document,
        }
    }

    fn comparison(&mut self) -> Result<FormulaValue> {
        let left = self.sum()?;
        self.skip_spaces();

        let operator = match self.peek() {
            Some(b'=' | b'<' | b'>' | b'!') => self.comparison_operator()?,
            _ => return Ok(wrap_number(left)),
        };

        let right = self.sum()?;
        let (Some(left), Some(right)) = (left, right) else {
            return Ok(FormulaValue::Null);
        };

        let holds = match operator {
            b"=" => left == right,
            b"<>" | b"!=" => left != right,
            b">" => left > right,
            b">=" => left >= right,
            b"<" => left < right,
            b"<=" => left <= right,
            _ => unreachable!(),
        };
        Ok(FormulaValue::Boolean(holds))
    }

    fn comparison_operator(&mut self) -> Result<&'static [u8]> {
        for candidate in [
            &b">="[..],
            &b"<="[..],
            &b"<>"[..],
            &b"!="[..],
            &b"="[..],
            &b">"[..],
            &b"<"[..],
        ] {
            if self.input[self.position..].starts_with(candidate) {
                self.position += candidate.len();
                return Ok(match candidate {
                    b">=" => b">=",
                    b"<=" => b"<=",
                    b"<>" => b"<>",
                    b"!=" => b"!=",
                    b"=" => b"=",
                    b">" => b">",
                    _ => b"<",
                });
            }
        }
        Err(crate::err!("invalid comparison operator in formula"))
    }

    fn sum(&mut self) -> Result<Option<f64>> {
        let mut value = self.term()?;
        loop {
            self.skip_spaces();
            match self.peek() {
                Some(b'+') => {
                    self.position += 1;
                    let rhs = self.term()?;
                    value = combine(value, rhs, |a, b| a + b);
                }
                Some(b'-') => {
                    self.position += 1;
                    let rhs = self.term()?;
                    value = combine(value, rhs, |a, b| a - b);
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<Option<f64>> {
        let mut value = self.factor()?;
        loop {
            self.skip_spaces();
            match self.peek() {
                Some(b'*') => {
                    self.position += 1;
                    let rhs = self.factor()?;
                    value = combine(value, rhs, |a, b| a * b);
                }
                Some(b'/') => {
                    self.position += 1;
                    let rhs = self.factor()?;
                    value = combine(value, rhs, |a, b| a / b);
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<Option<f64>> {
        self.skip_spaces();
        match self.peek() {
            Some(b'-') => {
                self.position += 1;
                Ok(self.factor()?.map(|value| -value))
            }
            Some(b'(') => {
                self.position += 1;
                let value = self.sum()?;
                self.skip_spaces();
                if self.peek() != Some(b')') {
                    return Err(crate::err!("unbalanced parentheses in formula"));
                }
                self.position += 1;
                Ok(value)
            }
            Some(b'[') => {
                self.position += 1;
                let start = self.position;
                while self.peek().is_some_and(|b| b != b']') {
                    self.position += 1;
                }
                if self.peek() != Some(b']') {
                    return Err(crate::err!("unterminated field reference in formula"));
                }
                let reference = std::str::from_utf8(&self.input[start..self.position])
                    .map_err(|_| crate::err!("field reference is not valid UTF-8"))?
                    .trim()
                    .to_string();
                self.position += 1;
                Ok(self.document.field_value(&reference))
            }
            Some(b) if b.is_ascii_digit() || b == b'.' => {
                let start = self.position;
                while self
                    .peek()
                    .is_some_and(|b| b.is_ascii_digit() || b == b'.')
                {
                    self.position += 1;
                }
                let literal = std::str::from_utf8(&self.input[start..self.position])
                    .map_err(|_| crate::err!("numeric literal is not valid UTF-8"))?;
                literal
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| crate::err!("invalid numeric literal `{literal}` in formula"))
            }
            _ => Err(crate::err!("unexpected token in formula")),
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        self.skip_spaces();
        if self.position != self.input.len() {
            return Err(crate::err!("trailing input in formula"));
        }
        Ok(())
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.position += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.position).copied()
    }
}

fn combine(
    left: Option<f64>,
    right: Option<f64>,
    op: impl FnOnce(f64, f64) -> f64,
) -> Option<f64> {
    match (left, right) {
        (Some(left), Some(right)) => Some(op(left, right)),
        _ => None,
    }
}

fn wrap_number(value: Option<f64>) -> FormulaValue {
    match value {
        Some(value) => FormulaValue::Number(value),
        None => FormulaValue::Null,
    }
}

/// Form expansion backed by a static map, for deployments where the
/// sub-form relationships are configured rather than derived by a mapping
/// engine.
#[derive(Debug, Default)]
pub struct StaticTemplateSource {
    expansions: HashMap<String, Vec<String>>,
}

impl StaticTemplateSource {
    pub fn new(expansions: HashMap<String, Vec<String>>) -> Self {
        Self { expansions }
    }
}

#[async_trait]
impl TemplateRequirementSource for StaticTemplateSource {
    async fn expand_forms(
        &self,
        _report_version_id: i32,
        reported_forms: &[String],
    ) -> Result<Vec<String>> {
        let mut expanded = reported_forms.to_vec();
        for form in reported_forms {
            if let Some(extra_forms) = self.expansions.get(form) {
                for extra in extra_forms {
                    if !expanded.contains(extra) {
                        expanded.push(extra.clone());
                    }
                }
            }
        }
        Ok(expanded)
    }
}

/// Renders the human-readable status document as a single-page PDF, one
/// line per diagnostic. Finding lists longer than the page carry a count
/// of the remainder instead.
#[derive(Debug, Default)]
pub struct LopdfStatusRenderer;

const PDF_FINDING_LIMIT: usize = 40;

impl LopdfStatusRenderer {
    fn lines(report: &StatusReport) -> Vec<String> {
        let mut lines = vec![
            "Report Submission Result".to_string(),
            String::new(),
            format!("Submission token: {}", report.token),
            format!("Report: {}", report.report_code),
            format!("Period: {}", report.report_period),
            format!("Undertaking: {}", report.undertaking),
            format!("Submitted: {}", report.submitted_at.to_rfc3339()),
            format!("Completed: {}", report.completed_at.to_rfc3339()),
            format!(
                "Status: {}",
                if report.accepted { "Accepted" } else { "Rejected" }
            ),
        ];

        if !report.findings.is_empty() {
            lines.push(String::new());
            lines.push("Findings:".to_string());
            for finding in report.findings.iter().take(PDF_FINDING_LIMIT) {
                lines.push(format!(
                    "[{}] {}: {}",
                    finding.severity.as_str(),
                    finding.code,
                    finding.full_description()
                ));
            }
            if report.findings.len() > PDF_FINDING_LIMIT {
                lines.push(format!(
                    "... and {} more",
                    report.findings.len() - PDF_FINDING_LIMIT
                ));
            }
        }

        lines
    }

    fn render_document(report: &StatusReport) -> Result<Vec<u8>> {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("TL", vec![14.into()]),
            Operation::new("Td", vec![40.into(), 800.into()]),
        ];
        for (index, line) in Self::lines(report).iter().enumerate() {
            if index > 0 {
                operations.push(Operation::new("T*", vec![]));
            }
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(line.as_str())],
            ));
        }
        operations.push(Operation::new("ET", vec![]));

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)?;
        Ok(buffer)
    }
}

#[async_trait]
impl StatusPdfRenderer for LopdfStatusRenderer {
    async fn render(&self, report: &StatusReport, path: &Path) -> Result<()> {
        let content = Self::render_document(report)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<MonthlyReport xmlns="urn:example:monthly">
  <Header>
    <Year>2017</Year>
    <Period>2017-12</Period>
    <Undertaking>100001</Undertaking>
  </Header>
  <A>
    <Total>120.50</Total>
    <Rows><Row><Amount>20</Amount></Row></Rows>
  </A>
  <B>
    <Total>120.50</Total>
  </B>
</MonthlyReport>"#;

    fn parse() -> ParsedReportDocument {
        QuickXmlModelEngine::read(SAMPLE.as_bytes()).expect("sample parses")
    }

    #[test]
    fn reads_root_header_and_forms() {
        let document = parse();
        assert_eq!(document.root_name(), "MonthlyReport");
        assert_eq!(document.root_namespace(), "urn:example:monthly");
        assert_eq!(document.header_year(), Some(2017));
        assert_eq!(document.header_period().as_deref(), Some("2017-12"));
        assert_eq!(document.header_undertaking().as_deref(), Some("100001"));
        assert_eq!(document.reported_forms(), vec!["A", "B"]);
        assert_eq!(document.field_value("A:Total"), Some(120.5));
        assert_eq!(document.field_value("A:Amount"), Some(20.0));
        assert_eq!(document.field_value("C:Total"), None);
    }

    #[test]
    fn malformed_payload_yields_no_document() {
        assert!(QuickXmlModelEngine::read(b"<Report><Open></Report>").is_none());
        assert!(QuickXmlModelEngine::read(b"not xml at all").is_none());
    }

    #[tokio::test]
    async fn evaluates_arithmetic_and_references() {
        let document = parse();
        let evaluator = BasicFormulaEvaluator;

        let value = evaluator
            .evaluate(&document, "[A:Total] - [B:Total]")
            .await
            .unwrap();
        assert_eq!(value, FormulaValue::Number(0.0));

        let value = evaluator
            .evaluate(&document, "2 * (3 + 4)")
            .await
            .unwrap();
        assert_eq!(value, FormulaValue::Number(14.0));

        let value = evaluator
            .evaluate(&document, "[A:Total] >= 100")
            .await
            .unwrap();
        assert_eq!(value, FormulaValue::Boolean(true));
    }

    #[tokio::test]
    async fn missing_reference_is_null() {
        let document = parse();
        let evaluator = BasicFormulaEvaluator;

        let value = evaluator
            .evaluate(&document, "[C:Total] + 5")
            .await
            .unwrap();
        assert_eq!(value, FormulaValue::Null);

        let value = evaluator
            .evaluate(&document, "[C:Total] = 5")
            .await
            .unwrap();
        assert_eq!(value, FormulaValue::Null);
    }

    #[tokio::test]
    async fn syntax_errors_are_reported() {
        let document = parse();
        let evaluator = BasicFormulaEvaluator;
        assert!(evaluator.evaluate(&document, "1 +").await.is_err());
        assert!(evaluator.evaluate(&document, "(1 + 2").await.is_err());
        assert!(evaluator.evaluate(&document, "[A:Total").await.is_err());
    }

    #[tokio::test]
    async fn static_expansion_appends_sub_forms() {
        let mut map = HashMap::new();
        map.insert("A".to_string(), vec!["A1".to_string(), "A2".to_string()]);
        let source = StaticTemplateSource::new(map);

        let expanded = source
            .expand_forms(1, &["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert_eq!(expanded, vec!["A", "B", "A1", "A2"]);
    }

    #[tokio::test]
    async fn status_pdf_renders_to_disk() {
        use crate::finding::Finding;
        use chrono::{TimeZone, Utc};

        let report = StatusReport {
            token: uuid::Uuid::new_v4(),
            report_code: "FRP".to_string(),
            report_period: "2017-12".to_string(),
            undertaking: "100001".to_string(),
            submitted_at: Utc.with_ymd_and_hms(2017, 12, 5, 14, 30, 9).unwrap(),
            completed_at: Utc.with_ymd_and_hms(2017, 12, 5, 14, 30, 42).unwrap(),
            accepted: false,
            findings: vec![Finding::error("F-001", "Totals must balance")],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.pdf");
        LopdfStatusRenderer.render(&report, &path).await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }
}
