//! Tracing helpers
// (c) 2025 Consign contributors

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%SZ";

/// Environment variable that overrides what gets logged
const STANDARD_ENV_VAR: &str = "RUST_LOG";

/// Log filter setup: use `RUST_LOG` when present, otherwise log only our
/// own events at the given level.
fn filter_for(trace_level: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_from_env(STANDARD_ENV_VAR).or_else(|e| {
        if std::env::var(STANDARD_ENV_VAR).is_ok() {
            anyhow::bail!("{STANDARD_ENV_VAR} (set in environment) was not understood: {e}");
        }
        Ok(EnvFilter::try_new(format!("consign={trace_level}"))?)
    })
}

/// Sets up rust tracing to stderr.
///
/// **NOTE:** You can only run this once per process. A global bool prevents
/// re-running.
pub fn setup_tracing(trace_level: &str) -> anyhow::Result<()> {
    if TRACING_INITIALIZED.swap(true, Ordering::Relaxed) {
        tracing::warn!("setup_tracing called a second time (ignoring)");
        return Ok(());
    }
    let layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(ChronoUtc::new(TIMESTAMP_FORMAT.into()))
        .with_writer(std::io::stderr)
        .with_filter(filter_for(trace_level)?);
    tracing_subscriber::registry().with(layer).init();
    Ok(())
}
