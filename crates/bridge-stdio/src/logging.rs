//! Log output for the bridge binary.
//!
//! stdout carries the protocol, so log lines go to stderr and, with
//! `--debug-log`, to a plain-text file as well. The level filter sits behind
//! a reload layer so `logging/setLevel` can change it at runtime.

use anyhow::{Context, Result};
use bridge_core::{BridgeError, LogLevelControl};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Runtime handle on the active log filter.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelControl for LogHandle {
    fn set_level(&self, level: LevelFilter) -> bridge_core::Result<()> {
        self.filter
            .reload(EnvFilter::default().add_directive(level.into()))
            .map_err(|e| BridgeError::config(format!("Failed to change log level: {}", e)))
    }
}

/// Build the filter for `level`; `RUST_LOG` wins when set.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
    }
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {}", level))
}

/// Install the global subscriber.
pub fn init(level: &str, debug_log: Option<&Path>) -> Result<LogHandle> {
    let (filter, handle) = reload::Layer::new(build_filter(level)?);

    let file_layer = match debug_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open debug log {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .compact()
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogHandle { filter: handle })
}
