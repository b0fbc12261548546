//! Tracing setup: stdout plus one log file per run in the data directory.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDateTime;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// `<dir>/<prefix>_%Y%m%d%H%M%S.log`.
pub fn log_file_path(dir: &Path, prefix: &str, local_time: NaiveDateTime) -> PathBuf {
    dir.join(format!("{prefix}_{}.log", local_time.format("%Y%m%d%H%M%S")))
}

/// Install the global subscriber and return the log file path.
///
/// `RUST_LOG` takes precedence over `[logging].level`.
pub fn init(config: &LoggingConfig, dir: &Path) -> std::io::Result<PathBuf> {
    let path = log_file_path(dir, &config.file_prefix, chrono::Local::now().naive_local());
    let file = File::create(&path)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .map_err(std::io::Error::other)?;
    Ok(path)
}

/// Non-empty config lines, tab-prefixed, for the startup echo.
pub fn echo_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(|l| format!("\t{l}"))
        .collect()
}

/// Log the config file verbatim so every run's log records its settings.
pub fn echo_config(path: &Path) {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            info!("Config file {}:", path.display());
            for line in echo_lines(&content) {
                info!("{line}");
            }
        }
        Err(e) => info!("Config file {} could not be echoed: {e}", path.display()),
    }
}
