use crate::artifacts::{file_stem, ArtifactStore};
use crate::error::Result;
use crate::finding::{codes, descriptions, Finding};
use crate::submission::context::SubmissionContext;
use crate::submission::stage::Stage;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decodes the submitted payload, unwraps a recognised container, and
/// persists the raw report document under the naming convention. The
/// encoded copy is released as soon as the bytes are decoded so that only
/// one representation of the payload stays in memory.
pub struct ExtractionStage {
    store: ArtifactStore,
}

impl ExtractionStage {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

enum Unwrapped {
    Content(Vec<u8>),
    Finding(Finding),
}

/// Applies the container rules: a zip must hold exactly one entry, a gzip
/// stream is inflated, anything else passes through as-is. A payload that
/// announces a container it cannot honour is a corrupted archive.
fn unwrap_container(decoded: Vec<u8>) -> Unwrapped {
    if decoded.starts_with(&ZIP_MAGIC) {
        let mut archive = match zip::ZipArchive::new(Cursor::new(&decoded)) {
            Ok(archive) => archive,
            Err(_) => {
                return Unwrapped::Finding(Finding::error(
                    codes::ARCHIVE_CORRUPTED_ERROR,
                    descriptions::ARCHIVE_CORRUPTED_ERROR,
                ));
            }
        };

        if archive.len() != 1 {
            return Unwrapped::Finding(
                Finding::error(
                    codes::ARCHIVE_ENTRY_COUNT_ERROR,
                    descriptions::ARCHIVE_ENTRY_COUNT_ERROR,
                )
                .with_details(format!("{} entries", archive.len())),
            );
        }

        let mut content = Vec::new();
        let read = archive
            .by_index(0)
            .and_then(|mut entry| entry.read_to_end(&mut content).map_err(Into::into));
        match read {
            Ok(_) => Unwrapped::Content(content),
            Err(_) => Unwrapped::Finding(Finding::error(
                codes::ARCHIVE_CORRUPTED_ERROR,
                descriptions::ARCHIVE_CORRUPTED_ERROR,
            )),
        }
    } else if decoded.starts_with(&GZIP_MAGIC) {
        let mut content = Vec::new();
        match GzDecoder::new(decoded.as_slice()).read_to_end(&mut content) {
            Ok(_) => Unwrapped::Content(content),
            Err(_) => Unwrapped::Finding(Finding::error(
                codes::ARCHIVE_CORRUPTED_ERROR,
                descriptions::ARCHIVE_CORRUPTED_ERROR,
            )),
        }
    } else {
        Unwrapped::Content(decoded)
    }
}

#[async_trait]
impl Stage for ExtractionStage {
    fn name(&self) -> &'static str {
        "extraction"
    }

    async fn run(&self, ctx: &mut SubmissionContext) -> Result<()> {
        let Some(encoded) = ctx.encoded_payload.take() else {
            return Ok(());
        };

        let decoded = match BASE64_STANDARD.decode(encoded.as_bytes()) {
            Ok(decoded) => decoded,
            Err(_) => {
                ctx.fail_file(Finding::error(
                    codes::BASE64_DECODE_ERROR,
                    descriptions::BASE64_DECODE_ERROR,
                ));
                return Ok(());
            }
        };

        let content = match unwrap_container(decoded) {
            Unwrapped::Content(content) => content,
            Unwrapped::Finding(finding) => {
                ctx.fail_file(finding);
                return Ok(());
            }
        };

        // The stem comes from the declared metadata, so the document is
        // persisted even when resolution failed earlier in the chain.
        let stem = file_stem(
            &ctx.message.report_code,
            ctx.bank_code(),
            &ctx.message.report_period,
            ctx.message.time_submitted,
            ctx.status_row_id,
        );
        let path = self.store.save_report(&stem, &content).await?;
        tracing::info!(
            target: "reportsink::pipeline",
            event = "report_document_saved",
            token = %ctx.token,
            path = %path.display(),
            size = content.len(),
        );
        ctx.raw_document_path = Some(path);

        ctx.raw_document = Some(content);
        Ok(())
    }
}
