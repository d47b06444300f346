#[path = "support/mod.rs"]
mod support;

use reportsink::definitions::{DefinitionCache, FormulaDefinition, FormulaRow};
use reportsink::finding::{codes, Severity};
use reportsink::model::BasicFormulaEvaluator;
use reportsink::registry::ReportVersionRecord;
use reportsink::submission::context::SubmissionContext;
use reportsink::submission::formula::FormulaStage;
use reportsink::submission::stage::Stage;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use support::mocks::{self, MockDefinitionSource, MockDocument, MONTHLY_NAMESPACE};
use uuid::Uuid;

fn formula(code: &str, operator: &str, tolerance: Option<f64>, severity: i16) -> FormulaDefinition {
    FormulaDefinition::from_row(FormulaRow {
        id: 1,
        code: code.to_string(),
        description: "Totals must balance".to_string(),
        additional_description: None,
        severity,
        left_formula: "[A:Total]".to_string(),
        right_formula: "[B:Total]".to_string(),
        operator: operator.to_string(),
        tolerance,
        condition_formula: None,
        required_templates_left: Some("A".to_string()),
        required_templates_right: Some("B".to_string()),
        user_friendly_formula: Some("Assets equal liabilities".to_string()),
        active: true,
    })
    .unwrap()
}

fn document(forms: &[&str], values: &[(&str, f64)]) -> MockDocument {
    MockDocument {
        root_name: "MonthlyReport".to_string(),
        root_namespace: MONTHLY_NAMESPACE.to_string(),
        forms: forms.iter().map(|form| form.to_string()).collect(),
        values: values
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect::<HashMap<_, _>>(),
        viewable: true,
        ..MockDocument::default()
    }
}

fn context(document: MockDocument) -> SubmissionContext {
    let mut ctx = SubmissionContext::new(
        Uuid::new_v4(),
        42,
        mocks::message("FRP", "2017-12", "100001", ""),
        mocks::certificate("100001"),
    );
    ctx.version = Some(ReportVersionRecord {
        id: 9,
        root_element: "MonthlyReport".to_string(),
        root_namespace: MONTHLY_NAMESPACE.to_string(),
    });
    ctx.document = Some(Arc::new(document));
    ctx
}

fn stage(formulas: Vec<FormulaDefinition>) -> FormulaStage {
    let cache = Arc::new(DefinitionCache::new(Arc::new(
        MockDefinitionSource::with_formulas(formulas),
    )));
    FormulaStage::new(cache, Arc::new(BasicFormulaEvaluator))
}

#[tokio::test]
async fn violated_formula_rejects_with_evaluated_sides() {
    let stage = stage(vec![formula("F-001", "=", None, 2)]);
    let mut ctx = context(document(&["A", "B"], &[("A:Total", 100.0), ("B:Total", 90.0)]));

    stage.run(&mut ctx).await.unwrap();

    assert!(!ctx.report_valid);
    assert_eq!(ctx.findings.len(), 1);
    let finding = &ctx.findings[0];
    assert_eq!(finding.code, "F-001");
    assert_eq!(finding.severity, Severity::Error);
    assert_eq!(finding.formula.as_deref(), Some("[A:Total] = [B:Total]"));
    assert_eq!(finding.formula_result.as_deref(), Some("100.00 = 90.00"));
    assert_eq!(finding.formula_source.as_deref(), Some("A = B"));
    assert_eq!(
        finding.formula_description.as_deref(),
        Some("Assets equal liabilities")
    );
}

#[tokio::test]
async fn tolerance_absorbs_small_differences() {
    let within = stage(vec![formula("F-001", "=", Some(15.0), 2)]);
    let mut ctx = context(document(&["A", "B"], &[("A:Total", 100.0), ("B:Total", 90.0)]));
    within.run(&mut ctx).await.unwrap();
    assert!(ctx.report_valid);
    assert!(ctx.findings.is_empty());

    let outside = stage(vec![formula("F-001", "=", Some(5.0), 2)]);
    let mut ctx = context(document(&["A", "B"], &[("A:Total", 100.0), ("B:Total", 90.0)]));
    outside.run(&mut ctx).await.unwrap();
    assert!(!ctx.report_valid);
}

#[tokio::test]
async fn formula_skipped_when_templates_not_reported() {
    let stage = stage(vec![formula("F-001", "=", None, 2)]);
    let mut ctx = context(document(&["A"], &[("A:Total", 100.0)]));

    stage.run(&mut ctx).await.unwrap();

    assert!(ctx.report_valid);
    assert!(ctx.findings.is_empty());
}

#[tokio::test]
async fn null_side_counts_as_violation() {
    // Template B is reported but carries no total.
    let stage = stage(vec![formula("F-001", "=", None, 2)]);
    let mut ctx = context(document(&["A", "B"], &[("A:Total", 100.0)]));

    stage.run(&mut ctx).await.unwrap();

    assert!(!ctx.report_valid);
    assert_eq!(ctx.findings[0].formula_result.as_deref(), Some("100.00 = NULL"));
}

#[tokio::test]
async fn warnings_do_not_reject_the_report() {
    let stage = stage(vec![formula("F-001", "=", None, 1)]);
    let mut ctx = context(document(&["A", "B"], &[("A:Total", 100.0), ("B:Total", 90.0)]));

    stage.run(&mut ctx).await.unwrap();

    assert!(ctx.report_valid);
    assert_eq!(ctx.findings.len(), 1);
    assert_eq!(ctx.findings[0].severity, Severity::Warning);
}

#[tokio::test]
async fn false_condition_skips_the_check() {
    let mut gated = formula("F-001", "=", None, 2);
    gated.condition_formula = Some("[A:Flag] = 1".to_string());
    let stage = stage(vec![gated]);
    let mut ctx = context(document(
        &["A", "B"],
        &[("A:Total", 100.0), ("B:Total", 90.0), ("A:Flag", 0.0)],
    ));

    stage.run(&mut ctx).await.unwrap();

    assert!(ctx.report_valid);
    assert!(ctx.findings.is_empty());
}

#[tokio::test]
async fn true_condition_runs_the_check() {
    let mut gated = formula("F-001", "=", None, 2);
    gated.condition_formula = Some("[A:Flag] = 1".to_string());
    let stage = stage(vec![gated]);
    let mut ctx = context(document(
        &["A", "B"],
        &[("A:Total", 100.0), ("B:Total", 90.0), ("A:Flag", 1.0)],
    ));

    stage.run(&mut ctx).await.unwrap();

    assert!(!ctx.report_valid);
    assert_eq!(ctx.findings[0].code, "F-001");
}

#[tokio::test]
async fn unexpected_condition_result_keeps_the_formula_applicable() {
    // The flag is absent, so the condition evaluates to null instead of a
    // boolean; the formula still runs and the violation surfaces.
    let mut gated = formula("F-001", "=", None, 2);
    gated.condition_formula = Some("[A:Flag] = 1".to_string());
    let stage = stage(vec![gated]);
    let mut ctx = context(document(&["A", "B"], &[("A:Total", 100.0), ("B:Total", 90.0)]));

    stage.run(&mut ctx).await.unwrap();

    assert!(!ctx.report_valid);
    assert_eq!(ctx.findings.len(), 1);
    assert_eq!(ctx.findings[0].code, "F-001");
}

#[tokio::test]
async fn one_reported_template_per_side_is_enough() {
    let mut spread = formula("F-001", "=", None, 2);
    spread.right_formula = "[C:Total]".to_string();
    spread.required_templates_right = vec!["B".to_string(), "C".to_string()];
    let stage = stage(vec![spread]);

    // B was not reported, but C was; both sides apply.
    let mut ctx = context(document(&["A", "C"], &[("A:Total", 100.0), ("C:Total", 90.0)]));

    stage.run(&mut ctx).await.unwrap();

    assert!(!ctx.report_valid);
    assert_eq!(ctx.findings[0].code, "F-001");
}

#[tokio::test]
async fn empty_template_sides_always_apply() {
    let mut unconditional = formula("F-001", "=", None, 2);
    unconditional.required_templates_left = Vec::new();
    unconditional.required_templates_right = Vec::new();
    let stage = stage(vec![unconditional]);
    let mut ctx = context(document(&["Z"], &[]));

    stage.run(&mut ctx).await.unwrap();

    // Both sides evaluate to null, which counts as a violation.
    assert!(!ctx.report_valid);
    assert_eq!(ctx.findings[0].formula_result.as_deref(), Some("NULL = NULL"));
}

#[tokio::test]
async fn evaluator_failure_propagates() {
    let mut broken = formula("F-001", "=", None, 2);
    broken.left_formula = "1 +".to_string();
    let stage = stage(vec![broken]);
    let mut ctx = context(document(&["A", "B"], &[("B:Total", 90.0)]));

    assert!(stage.run(&mut ctx).await.is_err());
}

#[tokio::test]
async fn invalid_model_yields_validation_failed() {
    let stage = stage(vec![formula("F-001", "=", None, 2)]);
    let mut ctx = context(document(&["A", "B"], &[]));
    ctx.model_valid = false;

    stage.run(&mut ctx).await.unwrap();

    assert!(!ctx.report_valid);
    assert_eq!(ctx.findings[0].code, codes::VALIDATION_FAILED);
}

#[tokio::test]
async fn missing_document_yields_validation_failed() {
    let stage = stage(vec![formula("F-001", "=", None, 2)]);
    let mut ctx = context(document(&["A", "B"], &[]));
    ctx.document = None;

    stage.run(&mut ctx).await.unwrap();

    assert!(!ctx.report_valid);
    assert_eq!(ctx.findings[0].code, codes::VALIDATION_FAILED);
}

#[tokio::test]
async fn missing_definitions_surface_as_error() {
    let source = Arc::new(MockDefinitionSource::empty());
    source.fail.store(true, Ordering::SeqCst);
    let cache = Arc::new(DefinitionCache::new(source));
    let stage = FormulaStage::new(cache, Arc::new(BasicFormulaEvaluator));
    let mut ctx = context(document(&["A", "B"], &[("A:Total", 100.0)]));

    assert!(stage.run(&mut ctx).await.is_err());
}
