use std::error::Error;

use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter; `log` records (e.g. from sqlx) are forwarded into tracing.
pub fn setup_tracing(json: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
    LogTracer::init()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    Ok(())
}
