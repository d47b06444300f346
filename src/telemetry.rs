use crate::error::Result;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Level overrides come from
/// `RUST_LOG`; the default keeps service logs at info.
pub fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reportsink=info,info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}
