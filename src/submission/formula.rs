use crate::definitions::DefinitionCache;
use crate::engines::FormulaEvaluator;
use crate::error::Result;
use crate::finding::{codes, Finding};
use crate::submission::context::SubmissionContext;
use crate::submission::stage::Stage;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Evaluates the report version's validation formulas against the parsed
/// document. A formula applies when each side either requires no templates
/// or has at least one of them reported (directly or through expansion),
/// and its condition, if any, holds. A formula whose side evaluates to
/// null fails like a violated comparison.
pub struct FormulaStage {
    cache: Arc<DefinitionCache>,
    evaluator: Arc<dyn FormulaEvaluator>,
}

impl FormulaStage {
    pub fn new(cache: Arc<DefinitionCache>, evaluator: Arc<dyn FormulaEvaluator>) -> Self {
        Self { cache, evaluator }
    }
}

#[async_trait]
impl Stage for FormulaStage {
    fn name(&self) -> &'static str {
        "formulas"
    }

    async fn run(&self, ctx: &mut SubmissionContext) -> Result<()> {
        let document = match ctx.document.clone() {
            Some(document) if ctx.model_valid => document,
            _ => {
                ctx.fail_report(Finding::error(
                    codes::VALIDATION_FAILED,
                    "Formula validation could not run because the report file is not valid",
                ));
                return Ok(());
            }
        };

        let Some(version) = ctx.version.clone() else {
            ctx.report_valid = false;
            return Ok(());
        };

        let Some(definition) = self.cache.get(version.id).await else {
            // Build failures are not cached; this submission cannot be
            // judged and must not end up rejected on missing formulas.
            return Err(crate::err!(
                "validation formulas unavailable for report version {}",
                version.id
            ));
        };

        if ctx.expanded_forms.is_empty() {
            ctx.expanded_forms = document.reported_forms();
        }
        let available: HashSet<&str> = ctx.expanded_forms.iter().map(String::as_str).collect();
        let side_applies = |templates: &[String]| {
            templates.is_empty()
                || templates
                    .iter()
                    .any(|template| available.contains(template.as_str()))
        };

        let mut failures = Vec::new();

        for formula in definition.formulas.iter().filter(|formula| formula.active) {
            if !side_applies(&formula.required_templates_left)
                || !side_applies(&formula.required_templates_right)
            {
                continue;
            }

            if let Some(condition) = formula.condition_formula.as_deref() {
                let value = self
                    .evaluator
                    .evaluate(document.as_ref(), condition)
                    .await?;
                match value.as_boolean() {
                    Some(false) => continue,
                    Some(true) => {}
                    // A condition that does not produce a boolean cannot
                    // exempt the formula; it stays applicable.
                    None => {
                        tracing::error!(
                            target: "reportsink::pipeline",
                            event = "formula_condition_unexpected",
                            formula_code = %formula.code,
                            result = %value,
                        );
                    }
                }
            }

            let left = self
                .evaluator
                .evaluate(document.as_ref(), &formula.left_formula)
                .await?;
            let right = self
                .evaluator
                .evaluate(document.as_ref(), &formula.right_formula)
                .await?;

            let holds = match (left.as_number(), right.as_number()) {
                (Some(left), Some(right)) => formula.operator.holds(left, right, formula.tolerance),
                // A null on either side is a definitive failure; anything
                // else non-numeric cannot be compared and is skipped.
                _ if left.is_null() || right.is_null() => false,
                _ => {
                    tracing::warn!(
                        target: "reportsink::pipeline",
                        event = "formula_result_not_numeric",
                        formula_code = %formula.code,
                    );
                    continue;
                }
            };

            if !holds {
                let mut finding =
                    Finding::new(&formula.code, formula.description.clone(), formula.severity);
                finding.additional_description = formula.additional_description.clone();
                finding.formula = Some(formula.formula_text.clone());
                finding.formula_description = formula.friendly_formula.clone();
                finding.formula_result =
                    Some(formula.result_text(&left.to_string(), &right.to_string()));
                finding.formula_source = Some(formula.source_text());
                failures.push(finding);
            }
        }

        for finding in failures {
            ctx.fail_report(finding);
        }

        Ok(())
    }
}
