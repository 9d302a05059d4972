use crate::{Error, Result, RESULT_TARGET};
use std::path::Path;
use std::sync::Mutex;
use tracing::Metadata;
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Overrides the configured level with full filter directives, e.g. `info,sbc=debug`.
pub const LOG_ENV: &str = "PODBENCH_LOG";

pub fn env_filter(level: &str) -> Result<EnvFilter> {
    let directives = std::env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| level.to_string());
    EnvFilter::try_new(&directives)
        .map_err(|err| Error::Config(format!("log filter '{directives}': {err}")))
}

fn is_result(meta: &Metadata<'_>) -> bool {
    meta.target() == RESULT_TARGET
}

/// Installs the global subscriber: stderr, an optional append-mode file, and a bare
/// layer for run outcomes. The stderr layer never shows `RESULT` events itself.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<()> {
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter(level)?)
        .with_filter(filter_fn(|meta| !is_result(meta)));

    let file = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(env_filter(level)?),
            )
        }
        None => None,
    };

    let outcome = fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_filter(filter_fn(is_result));

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .with(outcome)
        .try_init()
        .map_err(|err| Error::Config(format!("logger: {err}")))
}
