use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub const LOG_ENV: &str = "POPLENS_LOG";

/// Installs the global `tracing` subscriber.
///
/// The terminal belongs to the UI, so events go to the configured log file.
/// Without a log file nothing is installed and events are dropped.
/// Calling this twice is harmless; the second subscriber is discarded.
pub fn init(cfg: &LogConfig) -> Result<()> {
    let Some(path) = cfg.file.as_ref() else {
        return Ok(());
    };
    let file = open_log_file(path)?;
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init();
    Ok(())
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: create directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("logging: open {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_creates_log_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("poplens.log");
        init(&LogConfig {
            level: "debug".into(),
            file: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn init_without_file_is_noop() {
        init(&LogConfig {
            level: "info".into(),
            file: None,
        })
        .unwrap();
    }
}
