//! Logging bootstrap for a mount process.

use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Config;

/// Keeps the non-blocking log writer alive; hold it for the lifetime of
/// the mount.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Install the global subscriber. "development" defaults the filter to
/// DEBUG, "production" to INFO; `RUST_LOG` overrides either. When
/// `log_output_path` is set, output goes to that file without ANSI
/// colors, otherwise to stdout.
pub fn init(config: &Config) -> anyhow::Result<LogGuard> {
    let default_level = if config.logging == "development" {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let (layer, guard) = match &config.log_output_path {
        Some(path) => {
            let path = Path::new(path);
            let directory = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log_output_path has no file name"))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter);
            (layer, guard)
        }
        None => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_writer(writer)
                .with_filter(env_filter);
            (layer, guard)
        }
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?;

    Ok(LogGuard { _guard: guard })
}
