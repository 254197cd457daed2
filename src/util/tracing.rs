//! Tracing setup
// (c) 2025 Ross Younger

use anyhow::Context as _;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Environment variable that controls what gets logged
const STANDARD_ENV_VAR: &str = "RUST_LOG";

/// Log filter setup:
/// honour `RUST_LOG` if set; otherwise log replup and device output at the
/// given level.
fn filter_for(trace_level: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_from_env(STANDARD_ENV_VAR).or_else(|e| {
        if std::env::var(STANDARD_ENV_VAR).is_ok() {
            anyhow::bail!("{STANDARD_ENV_VAR} (set in environment) was not understood: {e}");
        }
        EnvFilter::try_new(format!("replup={trace_level},device={trace_level}"))
            .context("constructing log filter")
    })
}

/// Initialise the tracing subscriber.
///
/// Output goes to stderr; if `log_file` is given, everything at the
/// filter level also goes there (without colour).
pub fn setup_tracing(trace_level: &str, log_file: Option<&str>) -> anyhow::Result<()> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter_for(trace_level)?);

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("could not open log file {path}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Arc::new(file))
                    .with_filter(filter_for(trace_level)?),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("initialising tracing")?;
    Ok(())
}
