use crate::engines::TemplateRequirementSource;
use crate::error::Result;
use crate::submission::context::SubmissionContext;
use crate::submission::stage::Stage;
use async_trait::async_trait;
use std::sync::Arc;

/// Expands the reported forms with the sub-forms they imply, ahead of the
/// formula stage's applicability checks. The parsed document is left
/// untouched; the expansion lives on the context.
pub struct TemplateStage {
    source: Arc<dyn TemplateRequirementSource>,
}

impl TemplateStage {
    pub fn new(source: Arc<dyn TemplateRequirementSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Stage for TemplateStage {
    fn name(&self) -> &'static str {
        "templates"
    }

    async fn run(&self, ctx: &mut SubmissionContext) -> Result<()> {
        if !ctx.model_valid {
            return Ok(());
        }
        let Some(document) = ctx.document.clone() else {
            return Ok(());
        };
        let Some(version) = ctx.version.as_ref() else {
            return Ok(());
        };

        let reported = document.reported_forms();
        ctx.expanded_forms = self.source.expand_forms(version.id, &reported).await?;

        Ok(())
    }
}
