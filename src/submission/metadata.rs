use crate::error::Result;
use crate::finding::{codes, Finding};
use crate::period::ReportingPeriod;
use crate::registry::RegistrySource;
use crate::submission::context::SubmissionContext;
use crate::submission::stage::Stage;
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves the declared metadata against the registry: the submitting
/// bank (cross-checked against the client certificate), the report, the
/// reporting period and the report version in force for it.
///
/// Every check that can run does run, so a submission with several
/// metadata problems reports all of them at once.
pub struct MetadataStage {
    registry: Arc<dyn RegistrySource>,
    certificate_prefix: String,
}

const BANK_CODE_LEN: usize = 6;

impl MetadataStage {
    pub fn new(registry: Arc<dyn RegistrySource>, certificate_prefix: impl Into<String>) -> Self {
        Self {
            registry,
            certificate_prefix: certificate_prefix.into(),
        }
    }

    /// The six-character bank code that follows the configured prefix in
    /// the certificate subject.
    fn bank_code_from_subject(&self, subject: &str) -> Option<String> {
        let index = subject.find(&self.certificate_prefix)?;
        let rest = &subject[index + self.certificate_prefix.len()..];
        if rest.len() < BANK_CODE_LEN || !rest.is_char_boundary(BANK_CODE_LEN) {
            return None;
        }
        Some(rest[..BANK_CODE_LEN].to_string())
    }
}

#[async_trait]
impl Stage for MetadataStage {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn run(&self, ctx: &mut SubmissionContext) -> Result<()> {
        match self.bank_code_from_subject(&ctx.certificate.subject) {
            None => {
                ctx.fail_model(Finding::error(
                    codes::BANK_NOT_SPECIFIED,
                    "Submitting bank cannot be determined from the client certificate",
                ));
            }
            Some(code) => match self.registry.bank_by_code(&code).await? {
                None => {
                    ctx.fail_model(
                        Finding::error(
                            codes::BANK_NOT_FOUND,
                            "Submitting bank is not registered",
                        )
                        .with_details(code.clone()),
                    );
                }
                Some(bank) => {
                    if !bank.active {
                        ctx.fail_model(
                            Finding::error(
                                codes::BANK_NOT_ACTIVE,
                                "Submitting bank is not active",
                            )
                            .with_details(bank.code.clone()),
                        );
                    }
                    if bank.code != ctx.message.undertaking {
                        ctx.fail_model(
                            Finding::error(
                                codes::BANK_NOT_ALLOWED,
                                "Submitting bank is not allowed to report for the declared undertaking",
                            )
                            .with_details(format!(
                                "certificate: {}, declared: {}",
                                bank.code, ctx.message.undertaking
                            )),
                        );
                    }
                    ctx.bank = Some(bank);
                }
            },
        }

        let report = self.registry.report_by_code(&ctx.message.report_code).await?;
        match report {
            None => {
                ctx.fail_model(
                    Finding::error(codes::REPORT_NOT_FOUND, "Report code is not registered")
                        .with_details(ctx.message.report_code.clone()),
                );
            }
            Some(report) => {
                match ReportingPeriod::parse(&ctx.message.report_period, report.recurrence) {
                    None => {
                        ctx.fail_model(
                            Finding::error(
                                codes::REPORT_PERIOD_FORMAT_INVALID,
                                "Report period does not match the report's recurrence",
                            )
                            .with_details(ctx.message.report_period.clone()),
                        );
                    }
                    Some(period) => {
                        let version = self.registry.report_version(report.id, &period).await?;
                        match version {
                            None => {
                                ctx.fail_model(
                                    Finding::error(
                                        codes::REPORT_VERSION_NOT_FOUND,
                                        "No report version is in force for the declared period",
                                    )
                                    .with_details(format!(
                                        "{} {}",
                                        report.code, period.info
                                    )),
                                );
                            }
                            Some(version) => ctx.version = Some(version),
                        }
                        ctx.period = Some(period);
                    }
                }
                ctx.report = Some(report);
            }
        }

        Ok(())
    }
}
