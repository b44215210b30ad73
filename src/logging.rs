//! Tracing setup for the command line tool.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::errors::{Result, SyncError};

pub struct LogConfig<'a> {
    pub verbose: bool,
    pub mute: bool,
    pub json: bool,
    pub log_file: Option<&'a Path>,
}

/// Level used when `RUST_LOG` is not set. `mute` wins over `verbose`.
pub fn default_directive(verbose: bool, mute: bool) -> &'static str {
    if mute {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Console output on stderr (plain or JSON lines), plus an ANSI-free copy in
/// `log_file` when one is configured.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose, config.mute)));

    let file_layer = match config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
                SyncError::FileAccess(format!("Cannot open log file {}: {}", path.display(), e))
            })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    let (text_layer, json_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(false);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);
        (Some(layer), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SyncError::Config(format!("Failed to initialise logging: {}", e)))
}
