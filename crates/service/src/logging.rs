use std::path::Path;

use anyhow::{Context, Result, anyhow};
use core_types::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install a stdout subscriber with the default logging config.
pub fn init_tracing() -> Result<()> {
    init_tracing_with_config(&LoggingConfig::default()).map(|_| ())
}

/// Install the global subscriber described by `cfg`.
///
/// `RUST_LOG` takes precedence over `cfg.level`. When `cfg.file` is set a
/// daily-rolling non-blocking file writer is added; keep the returned guard
/// alive for the life of the process or buffered lines are lost.
pub fn init_tracing_with_config(cfg: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.level)
            .with_context(|| format!("invalid logging.level {:?}", cfg.level))?,
    };

    let mut layers: Vec<BoxedLayer> = vec![if cfg.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    }];

    let mut guard = None;
    if let Some(file) = cfg.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| anyhow!("logging.file has no file name: {file}"))?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create log dir {}", dir.display()))?;

        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
        layers.push(if cfg.json {
            fmt::layer().json().with_writer(writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        });
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(guard)
}
