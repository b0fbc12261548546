//! Error types for every collaborator boundary.
//!
//! Only [`ConfigError`] (and data-directory setup) is fatal. Everything else
//! is logged by the stage that produced it and the supervisor loop carries on.

use std::path::PathBuf;

use thiserror::Error;

/// Startup configuration failure. The process exits with status 1.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found (pass --config, set UPKWATCH_CONFIG or create upkwatch.toml)")]
    NotFound,
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Device command channel failure. Always transient: the device is simply
/// considered unhealthy for this cycle.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("command port is not active {address}: {reason}")]
    Unreachable { address: String, reason: String },
    #[error("no session: connect() has not succeeded")]
    NotConnected,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command {0} timed out")]
    Timeout(String),
    #[error("command {command} failed: {message}")]
    Command { command: String, message: String },
    #[error("malformed response to {command}: {reason}")]
    Malformed { command: String, reason: String },
}

/// Power relay failure. Triggers the soft-reboot fallback.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },
    #[error("relay request to {0} timed out")]
    Timeout(String),
    #[error("relay answered HTTP {status}")]
    Status { status: u16 },
    #[error("unexpected relay response: {0}")]
    Response(String),
}

/// Service stop/start failure (the command could not be run at all).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to spawn service command: {0}")]
    SpawnFailed(String),
    #[error("service command failed: {0}")]
    ProcessFailed(String),
    #[error("service command timed out")]
    Timeout,
}

/// Data directory scan failure. The sample is skipped.
#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("invalid file pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },
}

/// Non-positive interval between two growth samples.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("time between samples should be more than zero (got {elapsed_secs}s)")]
pub struct TimingError {
    pub elapsed_secs: f64,
}

/// Device descriptor file could not be used (yet).
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("no file {0}")]
    Missing(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// OSM clock line could not be interpreted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("the log line should contain \"opcode=9\"")]
    NotPingFrame,
    #[error("wrong log line format: {0}")]
    LineFormat(String),
    #[error("wrong OSM time format, expected dd.mm.YYYY HH:MM:SS, got \"{0}\"")]
    PeerTime(String),
    #[error("wrong local time format, expected YYYY-mm-dd HH:MM:SS, got \"{0}\"")]
    LocalTime(String),
}
