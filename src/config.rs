use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub amqp: AmqpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub certificate: CertificateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AmqpConfig {
    pub url: String,
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    #[serde(default = "default_consumer_count")]
    pub consumer_count: usize,
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672/%2f".to_string(),
            exchange: "reports".to_string(),
            queue: "report-submission".to_string(),
            routing_key: "report.submission".to_string(),
            consumer_count: default_consumer_count(),
            prefetch: default_prefetch(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/reportsink".to_string(),
            max_connections: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory for the raw report documents extracted from submissions.
    pub report_dir: String,
    /// Directory for the generated status documents (PDF and XML).
    pub status_dir: String,
    /// Optional directory for raw inbound message dumps.
    #[serde(default)]
    pub message_dump_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            report_dir: "data/reports".to_string(),
            status_dir: "data/status".to_string(),
            message_dump_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateConfig {
    /// Prefix in the certificate subject after which the six-character
    /// bank code is expected.
    pub subject_prefix: String,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "CN=".to_string(),
        }
    }
}

const fn default_consumer_count() -> usize {
    1
}

const fn default_prefetch() -> u16 {
    1
}

impl ServiceConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("REPORTSINK").separator("__"))
            .build()?
            .try_deserialize()
    }
}
