use std::path::PathBuf;

/// Best-effort dump of raw inbound messages for postmortems. Disabled when
/// no directory is configured; a failed write never fails the pipeline.
#[derive(Debug, Clone, Default)]
pub struct MessageDump {
    dir: Option<PathBuf>,
}

impl MessageDump {
    pub fn new(dir: Option<impl Into<PathBuf>>) -> Self {
        Self {
            dir: dir.map(Into::into),
        }
    }

    pub async fn write(&self, token: &str, body: &[u8]) {
        let Some(dir) = self.dir.as_ref() else {
            return;
        };

        let path = dir.join(format!("msg_{token}.dmp"));
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, body).await
        }
        .await;

        if let Err(err) = result {
            tracing::warn!(
                target: "reportsink::dump",
                event = "message_dump_failed",
                path = %path.display(),
                error = %err,
            );
        }
    }
}
