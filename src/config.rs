//! Configuration loading, defaults and validation.
//!
//! The config file is resolved in order of precedence (highest wins):
//!
//! 1. `--config <path>` on the command line
//! 2. `UPKWATCH_CONFIG` environment variable
//! 3. `upkwatch.toml` in the current directory
//!
//! `UPKWATCH_SERVICE_NAME` overrides `[trigger1].service_name` after loading.
//!
//! ```toml
//! config_version = 1
//!
//! [main]
//! descriptor_filename = "instrument_description.json"  # inside trigger1.data_dir
//! device_reboot_duration_secs = 40
//! service_stop_pause_secs = 10
//!
//! # Optional: omit entirely to disable power-cycling
//! [relay]
//! address = "10.0.0.56"
//! outlet = 2
//! username = "visor"
//! password = "ping"
//!
//! [trigger1]
//! service_name = "upk-server"
//! data_dir = "/var/lib/upk/data"
//! files_template = "*.txt"
//! speed_threshold_mb_per_h = 8.0
//! check_interval_secs = 60
//! triggers_before_action = 5
//! service_restarts_per_device_reboot = 2   # 0 = never reboot the device
//! max_unsuccessful_reboots = 3
//!
//! # Optional: omit to disable the periodic restart and clock sync
//! [trigger2]
//! restart_interval_secs = 3600             # 0 = never
//! device_clock_source = 1                  # 0 off, 1 supervisor UTC, 2 OSM log
//! osm_log_template = "UPK_server_*.log"
//!
//! [service]
//! shell = "/bin/sh"
//! stop_command = "systemctl stop {service}"
//! start_command = "systemctl start {service}"
//! command_timeout_secs = 60
//!
//! [device]
//! connect_timeout_ms = 1000
//! command_timeout_secs = 10
//!
//! [logging]
//! level = "info"
//! file_prefix = "UPK_supervisor"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::ClockSource;
use crate::error::ConfigError;

/// Bump when the config format changes. Older files get a startup warning.
pub const CONFIG_VERSION: u32 = 1;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "upkwatch.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Format version of the file on disk.
    pub config_version: Option<u32>,
    pub main: MainConfig,
    /// Network relay used to power-cycle the device (None = no power-cycling).
    pub relay: Option<RelayConfig>,
    pub trigger1: GrowthConfig,
    /// Periodic restart settings (None = periodic trigger disabled).
    pub trigger2: Option<PeriodicConfig>,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    /// JSON file with the device address, relative to `trigger1.data_dir`.
    #[serde(default = "default_descriptor_filename")]
    pub descriptor_filename: String,
    /// Pause after power-cycling the device, in seconds.
    pub device_reboot_duration_secs: f64,
    /// Pause after stopping the service, in seconds.
    pub service_stop_pause_secs: f64,
}

/// Power relay (NetPing-style HTTP outlet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host or `host:port` of the relay's web interface.
    pub address: String,
    /// Outlet the device is wired to (1-based).
    pub outlet: u8,
    #[serde(default = "default_relay_username")]
    pub username: String,
    #[serde(default = "default_relay_password")]
    pub password: String,
}

/// Data-directory growth watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthConfig {
    /// Name of the supervised service.
    pub service_name: String,
    /// Directory the service writes its data files to.
    pub data_dir: PathBuf,
    /// Glob for the data files, relative to `data_dir`.
    #[serde(default = "default_files_template")]
    pub files_template: String,
    /// Growth below this speed (MB/hour) counts as slow.
    pub speed_threshold_mb_per_h: f64,
    /// How often the directory is measured, in seconds.
    pub check_interval_secs: f64,
    /// Consecutive slow samples before the service is restarted.
    pub triggers_before_action: u32,
    /// Service restarts between device reboots (0 = never reboot).
    pub service_restarts_per_device_reboot: u32,
    /// Consecutive failed device reboots after which reboots stop.
    pub max_unsuccessful_reboots: u32,
}

/// Unconditional periodic restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicConfig {
    /// Seconds between unconditional restarts (0 = never).
    pub restart_interval_secs: f64,
    /// Where the device clock is taken from on restart.
    #[serde(default)]
    pub device_clock_source: ClockSource,
    /// Glob for the acquisition service's logs, used by clock source 2.
    #[serde(default = "default_osm_log_template")]
    pub osm_log_template: String,
}

/// How the supervised service is stopped and started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Shell used to run the commands (`<shell> -c <command>`).
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Stop command; `{service}` is replaced with the service name.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
    /// Start command; `{service}` is replaced with the service name.
    #[serde(default = "default_start_command")]
    pub start_command: String,
    #[serde(default = "default_service_command_timeout")]
    pub command_timeout_secs: u64,
}

/// Device command channel tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Timeout for the reachability probe and session connect.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound for a single command round trip.
    #[serde(default = "default_device_command_timeout")]
    pub command_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Per-run log file name prefix, written into the data directory.
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

fn default_descriptor_filename() -> String {
    "instrument_description.json".to_string()
}
fn default_relay_username() -> String {
    "visor".to_string()
}
fn default_relay_password() -> String {
    "ping".to_string()
}
fn default_files_template() -> String {
    "*.txt".to_string()
}
fn default_osm_log_template() -> String {
    "UPK_server_*.log".to_string()
}
fn default_shell() -> String {
    "/bin/sh".to_string()
}
fn default_stop_command() -> String {
    "systemctl stop {service}".to_string()
}
fn default_start_command() -> String {
    "systemctl start {service}".to_string()
}
fn default_service_command_timeout() -> u64 {
    60
}
fn default_connect_timeout_ms() -> u64 {
    1000
}
fn default_device_command_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_file_prefix() -> String {
    "UPK_supervisor".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            stop_command: default_stop_command(),
            start_command: default_start_command(),
            command_timeout_secs: default_service_command_timeout(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_secs: default_device_command_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

impl Config {
    /// Resolve the config path: explicit flag, then `UPKWATCH_CONFIG`, then
    /// `upkwatch.toml` in the working directory.
    pub fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(p) = path {
            return Ok(p.to_path_buf());
        }
        if let Ok(p) = std::env::var("UPKWATCH_CONFIG") {
            return Ok(PathBuf::from(p));
        }
        let default = Path::new(DEFAULT_CONFIG_FILE);
        if default.exists() {
            Ok(default.to_path_buf())
        } else {
            Err(ConfigError::NotFound)
        }
    }

    /// Read, parse and validate the config file, then apply env overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        if let Ok(name) = std::env::var("UPKWATCH_SERVICE_NAME") {
            config.trigger1.service_name = name;
        }

        Ok(config)
    }

    /// Parse and validate an in-memory TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject durations a `Duration` cannot hold and empty required strings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_duration(
            "main.device_reboot_duration_secs",
            self.main.device_reboot_duration_secs,
        )?;
        check_duration(
            "main.service_stop_pause_secs",
            self.main.service_stop_pause_secs,
        )?;
        check_duration(
            "trigger1.check_interval_secs",
            self.trigger1.check_interval_secs,
        )?;
        if !self.trigger1.speed_threshold_mb_per_h.is_finite() {
            return Err(ConfigError::Invalid {
                key: "trigger1.speed_threshold_mb_per_h",
                reason: "must be a finite number".to_string(),
            });
        }
        if self.trigger1.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "trigger1.service_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.trigger1.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                key: "trigger1.data_dir",
                reason: "must not be empty".to_string(),
            });
        }
        if self.trigger1.files_template.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "trigger1.files_template",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(ref relay) = self.relay {
            if relay.outlet == 0 {
                return Err(ConfigError::Invalid {
                    key: "relay.outlet",
                    reason: "outlets are numbered from 1".to_string(),
                });
            }
            if relay.address.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "relay.address",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if let Some(ref periodic) = self.trigger2 {
            check_duration(
                "trigger2.restart_interval_secs",
                periodic.restart_interval_secs,
            )?;
        }
        Ok(())
    }

    /// Whether the on-disk format predates [`CONFIG_VERSION`].
    pub fn is_outdated(&self) -> bool {
        self.config_version.map_or(true, |v| v < CONFIG_VERSION)
    }

    /// Absolute path of the device descriptor file.
    pub fn descriptor_path(&self) -> PathBuf {
        self.trigger1.data_dir.join(&self.main.descriptor_filename)
    }

    pub fn device_reboot_duration(&self) -> Duration {
        Duration::from_secs_f64(self.main.device_reboot_duration_secs)
    }

    pub fn service_stop_pause(&self) -> Duration {
        Duration::from_secs_f64(self.main.service_stop_pause_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.trigger1.check_interval_secs)
    }

    /// Periodic restart interval; zero when the trigger is disabled.
    pub fn periodic_interval(&self) -> Duration {
        self.trigger2
            .as_ref()
            .map_or(Duration::ZERO, |p| Duration::from_secs_f64(p.restart_interval_secs))
    }

    /// Clock source; disabled when `[trigger2]` is absent.
    pub fn clock_source(&self) -> ClockSource {
        self.trigger2
            .as_ref()
            .map_or(ClockSource::Disabled, |p| p.device_clock_source)
    }

    pub fn osm_log_template(&self) -> String {
        self.trigger2
            .as_ref()
            .map_or_else(default_osm_log_template, |p| p.osm_log_template.clone())
    }
}

/// Accept only values the `Duration` accessors below can represent.
fn check_duration(key: &'static str, secs: f64) -> Result<(), ConfigError> {
    if Duration::try_from_secs_f64(secs).is_ok() {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("{secs} is not a representable non-negative number of seconds"),
        })
    }
}
