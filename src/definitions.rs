//! Validation formula definitions per report version, and the shared cache
//! that hands them out to the workers.

use crate::engines::format_grouped;
use crate::error::Result;
use crate::finding::Severity;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ComparisonOperator {
    /// Accepts the operator spellings found in definition rows, folding the
    /// `=>`/`=<`/`!=` aliases onto their canonical forms.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "=" => Some(ComparisonOperator::Eq),
            "<>" | "!=" => Some(ComparisonOperator::Neq),
            ">" => Some(ComparisonOperator::Gt),
            ">=" | "=>" => Some(ComparisonOperator::Gte),
            "<" => Some(ComparisonOperator::Lt),
            "<=" | "=<" => Some(ComparisonOperator::Lte),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Neq => "<>",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Gte => ">=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Lte => "<=",
        }
    }

    /// Compares two evaluated sides with the tolerance applied symmetrically:
    /// equality holds within the band, and inequalities gain that much slack.
    pub fn holds(self, left: f64, right: f64, tolerance: Option<f64>) -> bool {
        let tolerance = tolerance.unwrap_or(0.0).abs();
        match self {
            ComparisonOperator::Eq => (left - right).abs() <= tolerance,
            ComparisonOperator::Neq => (left - right).abs() > tolerance,
            ComparisonOperator::Gt => left > right - tolerance,
            ComparisonOperator::Gte => left >= right - tolerance,
            ComparisonOperator::Lt => left < right + tolerance,
            ComparisonOperator::Lte => left <= right + tolerance,
        }
    }
}

/// Raw definition row as stored, before operator normalization.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FormulaRow {
    pub id: i32,
    pub code: String,
    pub description: String,
    pub additional_description: Option<String>,
    pub severity: i16,
    pub left_formula: String,
    pub right_formula: String,
    pub operator: String,
    pub tolerance: Option<f64>,
    pub condition_formula: Option<String>,
    pub required_templates_left: Option<String>,
    pub required_templates_right: Option<String>,
    pub user_friendly_formula: Option<String>,
    pub active: bool,
}

/// One validation formula ready for evaluation.
#[derive(Debug, Clone)]
pub struct FormulaDefinition {
    pub id: i32,
    pub code: String,
    pub description: String,
    pub additional_description: Option<String>,
    pub severity: Severity,
    pub left_formula: String,
    pub right_formula: String,
    pub condition_formula: Option<String>,
    pub operator: ComparisonOperator,
    pub tolerance: Option<f64>,
    pub active: bool,
    pub required_templates_left: Vec<String>,
    pub required_templates_right: Vec<String>,
    /// Display form `left op right`, with the tolerance noted when present.
    pub formula_text: String,
    pub friendly_formula: Option<String>,
}

impl FormulaDefinition {
    /// Returns `None` when the operator is not one of the supported
    /// spellings; such rows are skipped at load time.
    pub fn from_row(row: FormulaRow) -> Option<Self> {
        let operator = ComparisonOperator::parse(&row.operator)?;

        let severity = if row.severity == 1 {
            Severity::Warning
        } else {
            Severity::Error
        };

        let mut formula_text = format!(
            "{} {} {}",
            row.left_formula,
            operator.symbol(),
            row.right_formula
        );
        if let Some(tolerance) = row.tolerance {
            formula_text.push_str(&format!(
                " [with tolerance of {}]",
                tolerance_display(tolerance)
            ));
        }

        Some(Self {
            id: row.id,
            code: row.code,
            description: row.description,
            additional_description: row.additional_description,
            severity,
            left_formula: row.left_formula,
            right_formula: row.right_formula,
            condition_formula: row
                .condition_formula
                .filter(|value| !value.trim().is_empty()),
            operator,
            tolerance: row.tolerance,
            active: row.active,
            required_templates_left: split_templates(row.required_templates_left.as_deref()),
            required_templates_right: split_templates(row.required_templates_right.as_deref()),
            formula_text,
            friendly_formula: row.user_friendly_formula,
        })
    }

    /// `{left value} op {right value}` as shown in status documents, with
    /// the tolerance noted when one applies.
    pub fn result_text(&self, left: &str, right: &str) -> String {
        let mut text = format!("{left} {} {right}", self.operator.symbol());
        if let Some(tolerance) = self.tolerance {
            text.push_str(&format!(
                " [with tolerance of {}]",
                tolerance_display(tolerance)
            ));
        }
        text
    }

    /// Which templates fed the two sides of the comparison.
    pub fn source_text(&self) -> String {
        format!(
            "{} {} {}",
            self.required_templates_left.join(","),
            self.operator.symbol(),
            self.required_templates_right.join(",")
        )
    }
}

fn split_templates(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Tolerances above one are rounded for display; smaller ones keep their
/// most concise full-precision form.
fn tolerance_display(tolerance: f64) -> String {
    if tolerance.abs() > 1.0 {
        format_grouped((tolerance * 100.0).round() / 100.0)
    } else {
        format!("{tolerance}")
    }
}

/// All validation formulas of one report version.
#[derive(Debug, Clone)]
pub struct ReportDefinition {
    pub report_version_id: i32,
    pub formulas: Vec<FormulaDefinition>,
}

#[async_trait]
pub trait DefinitionSource: Send + Sync {
    async fn load(&self, report_version_id: i32) -> Result<ReportDefinition>;
}

pub struct SqlDefinitionSource {
    pool: PgPool,
}

impl SqlDefinitionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DefinitionSource for SqlDefinitionSource {
    async fn load(&self, report_version_id: i32) -> Result<ReportDefinition> {
        let rows: Vec<FormulaRow> = sqlx::query_as(
            "SELECT id, code, description, additional_description, severity, \
                    left_formula, right_formula, operator, tolerance, condition_formula, \
                    required_templates_left, required_templates_right, \
                    user_friendly_formula, active \
             FROM report_validation_formula \
             WHERE report_version_id = $1 AND active = TRUE \
             ORDER BY id",
        )
        .bind(report_version_id)
        .fetch_all(&self.pool)
        .await?;

        let mut formulas = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            let operator = row.operator.clone();
            match FormulaDefinition::from_row(row) {
                Some(formula) => formulas.push(formula),
                None => {
                    tracing::warn!(
                        target: "reportsink::definitions",
                        event = "formula_skipped",
                        formula_id = id,
                        operator = %operator,
                        "unsupported operator in formula definition"
                    );
                }
            }
        }

        Ok(ReportDefinition {
            report_version_id,
            formulas,
        })
    }
}

/// Process-wide cache of report definitions.
///
/// Successful builds are published once and shared. Concurrent requests for
/// the same version serialise on a per-version gate so the definition is
/// built at most once, while requests for other versions proceed
/// untouched. A failed build is returned as `None` and deliberately not
/// cached; the next request retries the source.
pub struct DefinitionCache {
    source: Arc<dyn DefinitionSource>,
    published: RwLock<HashMap<i32, Arc<ReportDefinition>>>,
    gates: Mutex<HashMap<i32, Arc<tokio::sync::Mutex<()>>>>,
}

impl DefinitionCache {
    pub fn new(source: Arc<dyn DefinitionSource>) -> Self {
        Self {
            source,
            published: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, report_version_id: i32) -> Option<Arc<ReportDefinition>> {
        if let Some(definition) = self.lookup(report_version_id) {
            return Some(definition);
        }

        let gate = self.gate_for(report_version_id);
        let _held = gate.lock().await;

        // Another worker may have finished the build while we waited.
        if let Some(definition) = self.lookup(report_version_id) {
            return Some(definition);
        }

        match self.source.load(report_version_id).await {
            Ok(definition) => {
                let shared = Arc::new(definition);
                self.published
                    .write()
                    .expect("definition cache lock poisoned")
                    .insert(report_version_id, Arc::clone(&shared));
                tracing::info!(
                    target: "reportsink::definitions",
                    event = "definition_cached",
                    report_version_id,
                    formula_count = shared.formulas.len(),
                );
                Some(shared)
            }
            Err(err) => {
                tracing::error!(
                    target: "reportsink::definitions",
                    event = "definition_build_failed",
                    report_version_id,
                    error = %err,
                );
                None
            }
        }
    }

    pub fn cached(&self, report_version_id: i32) -> bool {
        self.lookup(report_version_id).is_some()
    }

    fn lookup(&self, report_version_id: i32) -> Option<Arc<ReportDefinition>> {
        self.published
            .read()
            .expect("definition cache lock poisoned")
            .get(&report_version_id)
            .cloned()
    }

    fn gate_for(&self, report_version_id: i32) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().expect("definition cache lock poisoned");
        Arc::clone(
            gates
                .entry(report_version_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
