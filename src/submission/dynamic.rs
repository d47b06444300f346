use crate::error::Result;
use crate::finding::{codes, Finding};
use crate::submission::context::SubmissionContext;
use crate::submission::stage::Stage;
use async_trait::async_trait;

/// Surfaces dynamic field violations reported by the parsed document, one
/// finding per violation. Any violation rejects the report content. Runs
/// only while the model is still valid.
pub struct DynamicFieldStage;

#[async_trait]
impl Stage for DynamicFieldStage {
    fn name(&self) -> &'static str {
        "dynamic-fields"
    }

    async fn run(&self, ctx: &mut SubmissionContext) -> Result<()> {
        if !ctx.model_valid {
            return Ok(());
        }
        let Some(document) = ctx.document.clone() else {
            return Ok(());
        };

        for violation in document.dynamic_field_violations() {
            ctx.fail_report(
                Finding::error(codes::DYNAMIC_FIELD_ERROR, "Dynamic field validation failed")
                    .with_details(format!("{}: {}", violation.field, violation.detail)),
            );
        }

        Ok(())
    }
}
