use crate::error::Result;
use crate::finding::{codes, Finding};
use crate::submission::context::SubmissionContext;
use crate::submission::stage::Stage;
use async_trait::async_trait;

/// Cross-checks the document header against the resolved metadata: the
/// year and period inside the document must match the declared period, and
/// the undertaking must match the declared one. A header field the
/// document does not carry counts as a mismatch. Runs only while both the
/// file and the model are still valid.
pub struct HeaderStage;

#[async_trait]
impl Stage for HeaderStage {
    fn name(&self) -> &'static str {
        "header"
    }

    async fn run(&self, ctx: &mut SubmissionContext) -> Result<()> {
        if !ctx.file_valid || !ctx.model_valid {
            return Ok(());
        }
        let Some(document) = ctx.document.clone() else {
            return Ok(());
        };
        let Some(period) = ctx.period.clone() else {
            return Ok(());
        };

        if let Some(expected_year) = period.year {
            if document.header_year() != Some(expected_year) {
                ctx.fail_report(
                    Finding::error(
                        codes::HEADER_YEAR_MISMATCH,
                        "Report header year does not match the declared period",
                    )
                    .with_details(format!(
                        "expected {expected_year}, found {}",
                        display_or_missing(document.header_year().map(|y| y.to_string())),
                    )),
                );
            }
        }

        if document.header_period().as_deref() != Some(period.info.as_str()) {
            ctx.fail_report(
                Finding::error(
                    codes::HEADER_PERIOD_MISMATCH,
                    "Report header period does not match the declared period",
                )
                .with_details(format!(
                    "expected {}, found {}",
                    period.info,
                    display_or_missing(document.header_period()),
                )),
            );
        }

        if document.header_undertaking().as_deref() != Some(ctx.message.undertaking.as_str()) {
            ctx.fail_report(
                Finding::error(
                    codes::HEADER_UNDERTAKING_MISMATCH,
                    "Report header undertaking does not match the declared undertaking",
                )
                .with_details(format!(
                    "expected {}, found {}",
                    ctx.message.undertaking,
                    display_or_missing(document.header_undertaking()),
                )),
            );
        }

        Ok(())
    }
}

fn display_or_missing(value: Option<String>) -> String {
    value.unwrap_or_else(|| "(missing)".to_string())
}
