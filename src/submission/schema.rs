use crate::engines::ReportModelEngine;
use crate::error::Result;
use crate::finding::{codes, Finding, Severity};
use crate::submission::context::SubmissionContext;
use crate::submission::stage::Stage;
use async_trait::async_trait;
use std::sync::Arc;

/// Parses the extracted document and checks it against the report
/// version's schema expectations. Runs only when a version resolved and a
/// document was extracted; otherwise the earlier failures already tell the
/// story. Structural problems mark the model invalid, like the metadata
/// checks before them.
pub struct SchemaStage {
    engine: Arc<dyn ReportModelEngine>,
}

impl SchemaStage {
    pub fn new(engine: Arc<dyn ReportModelEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Stage for SchemaStage {
    fn name(&self) -> &'static str {
        "schema"
    }

    async fn run(&self, ctx: &mut SubmissionContext) -> Result<()> {
        let Some(version) = ctx.version.clone() else {
            return Ok(());
        };
        let Some(content) = ctx.raw_document.as_deref() else {
            return Ok(());
        };

        let outcome = self.engine.parse(content, version.id).await?;

        let Some(document) = outcome.document else {
            ctx.fail_model(Finding::error(
                codes::INVALID_XML_STRUCTURE,
                "Submitted report is not a well-formed XML document",
            ));
            return Ok(());
        };

        if document.root_name() != version.root_element {
            ctx.fail_model(
                Finding::error(
                    codes::INVALID_ROOT_TAG,
                    "Report document has an unexpected root element",
                )
                .with_details(format!(
                    "expected {}, found {}",
                    version.root_element,
                    document.root_name()
                )),
            );
        }

        if document.root_namespace() != version.root_namespace {
            ctx.fail_model(
                Finding::error(
                    codes::INVALID_ROOT_NAMESPACE,
                    "Report document has an unexpected root namespace",
                )
                .with_details(format!(
                    "expected {}, found {}",
                    version.root_namespace,
                    document.root_namespace()
                )),
            );
        }

        for diagnostic in outcome.diagnostics {
            match diagnostic.severity {
                Severity::Error => ctx.fail_model(
                    Finding::error(codes::SCHEMA_ERROR, "Schema validation error")
                        .with_details(diagnostic.message),
                ),
                Severity::Warning => ctx.add_finding(
                    Finding::warning(codes::SCHEMA_WARNING, "Schema validation warning")
                        .with_details(diagnostic.message),
                ),
            }
        }

        ctx.document = Some(document);
        Ok(())
    }
}
