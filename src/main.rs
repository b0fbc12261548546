#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # upkwatch
//!
//! Watchdog for a data-acquisition service and the measurement instrument it
//! reads from.
//!
//! The acquisition service writes measurement files into a data directory.
//! When that directory stops growing fast enough the service is restarted,
//! and after repeated restarts the instrument is rebooted as well, by power
//! cycling it through a network relay or with a soft reboot command. An
//! optional periodic trigger restarts the service on a fixed schedule. Every
//! restart of a healthy instrument also saves a spectrum snapshot, resyncs
//! the instrument clock and logs its board temperature.
//!
//! ## Subcommands
//!
//! - `upkwatch run` (default): run the watchdog until SIGINT/SIGTERM (SIGHUP
//!   re-enables device reboots after too many unsuccessful ones)
//! - `upkwatch probe`: check the instrument once (exit 0 healthy, 2 otherwise)
//! - `upkwatch check-config`: load, validate and print the configuration
//!
//! ## Architecture
//!
//! ```text
//! main.rs          entry point, clap subcommands, collaborator wiring
//! supervisor.rs    one-second loop: periodic trigger, then growth trigger
//! trigger.rs       GrowthTrigger / PeriodicTrigger state machines
//! restart.rs       stop, settle, reboot?, snapshot + clock + temperature, start
//! escalator.rs     relay power cycle or soft reboot, bounded retries
//! clock.rs         clock sync source (supervisor UTC or OSM log)
//! device/
//!   mod.rs         DeviceClient trait, health check
//!   hyperion.rs    TCP command-port client
//! relay/
//!   mod.rs         PowerRelay trait
//!   netping.rs     HTTP relay.cgi client
//! service.rs       ServiceController over shell commands (exec.rs)
//! measurement.rs   glob-based directory sizing
//! descriptor.rs    instrument descriptor JSON
//! config.rs        TOML + env-var configuration
//! logging.rs       stdout + per-run log file
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing::{error, info, warn};

use upkwatch::config::{Config, CONFIG_VERSION};
use upkwatch::descriptor::{wait_for_descriptor, DeviceDescriptor};
use upkwatch::device::hyperion::HyperionClient;
use upkwatch::device::{check_health, Health};
use upkwatch::escalator::RebootEscalator;
use upkwatch::logging;
use upkwatch::measurement::{GlobMeasurement, MeasurementSource};
use upkwatch::relay::netping::NetPingRelay;
use upkwatch::restart::{RestartSettings, Restarter};
use upkwatch::service::CommandServiceController;
use upkwatch::supervisor::{DataFiles, Supervisor};
use upkwatch::trigger::{GrowthSettings, GrowthTrigger, PeriodicTrigger};

/// Watchdog for a data-acquisition service and its instrument.
#[derive(Parser)]
#[command(name = "upkwatch", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watchdog (default when no subcommand given).
    Run,
    /// Check the instrument once and exit.
    Probe,
    /// Validate the configuration and print it.
    CheckConfig,
}

/// Exit status of `probe` for an unhealthy or unknown instrument.
const PROBE_UNHEALTHY: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config_path).await,
        Commands::Probe => probe(config_path).await,
        Commands::CheckConfig => check_config(config_path),
    }
}

fn load_config(path: Option<&Path>) -> Option<(PathBuf, Config)> {
    let loaded = Config::resolve_path(path).and_then(|p| Config::load(&p).map(|c| (p, c)));
    match loaded {
        Ok(loaded) => Some(loaded),
        Err(e) => {
            eprintln!("upkwatch: {e}");
            None
        }
    }
}

fn growth_settings(config: &Config) -> GrowthSettings {
    GrowthSettings {
        threshold_mb_per_h: config.trigger1.speed_threshold_mb_per_h,
        check_interval: config.check_interval(),
        triggers_before_action: config.trigger1.triggers_before_action,
        restarts_per_device_reboot: config.trigger1.service_restarts_per_device_reboot,
    }
}

async fn run(config_path: Option<&Path>) -> ExitCode {
    let Some((path, config)) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };

    let data_dir = config.trigger1.data_dir.clone();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("upkwatch: cannot create data directory {}: {e}", data_dir.display());
        return ExitCode::FAILURE;
    }
    let log_path = match logging::init(&config.logging, &data_dir) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("upkwatch: cannot open log file in {}: {e}", data_dir.display());
            return ExitCode::FAILURE;
        }
    };

    info!("upkwatch v{} starting", env!("CARGO_PKG_VERSION"));
    match std::env::current_exe() {
        Ok(exe) => info!("Executable: {}", exe.display()),
        Err(e) => warn!("Executable path unknown: {e}"),
    }
    info!("Log file: {}", log_path.display());
    logging::echo_config(&path);
    if config.is_outdated() {
        warn!(
            "Config version {} is older than {CONFIG_VERSION}, check the file against the current format",
            config
                .config_version
                .map_or_else(|| "(missing)".to_string(), |v| v.to_string())
        );
    }

    let descriptor = wait_for_descriptor(&config.descriptor_path(), config.check_interval()).await;
    info!("Device: address {}", descriptor.address);

    let device = HyperionClient::new(&descriptor.address, &config.device);
    let relay = config.relay.as_ref().map(NetPingRelay::new);
    match config.relay {
        Some(ref r) => info!("Relay: {} outlet {}", r.address, r.outlet),
        None => info!("Relay: not configured, device reboots use the command channel"),
    }
    let escalator = RebootEscalator::new(
        config.trigger1.max_unsuccessful_reboots,
        config.device_reboot_duration(),
        config.relay.as_ref().map(|r| r.outlet),
    );
    let restarter = Restarter::new(
        device,
        relay,
        CommandServiceController::new(&config.service),
        escalator,
        RestartSettings::from_config(&config),
    );

    let files = DataFiles {
        dir: data_dir,
        pattern: config.trigger1.files_template.clone(),
    };
    let measurement = GlobMeasurement;
    let baseline = match measurement.total_size(&files.dir, &files.pattern) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Growth: baseline measurement failed: {e}");
            0
        }
    };

    let now = Instant::now();
    let settings = growth_settings(&config);
    info!(
        "Growth: threshold {} MB/h, check every {:.0}s, {} slow checks per restart, \
         {} restarts per device reboot, max {} unsuccessful reboots",
        settings.threshold_mb_per_h,
        settings.check_interval.as_secs_f64(),
        settings.triggers_before_action,
        settings.restarts_per_device_reboot,
        config.trigger1.max_unsuccessful_reboots
    );
    let periodic = PeriodicTrigger::new(config.periodic_interval(), now);
    if periodic.is_enabled() {
        info!(
            "Periodic: restart every {:.0}s",
            config.periodic_interval().as_secs_f64()
        );
    } else {
        info!("Periodic: disabled");
    }

    let mut supervisor = Supervisor::new(
        restarter,
        GrowthTrigger::new(settings, now, baseline),
        periodic,
        measurement,
        files,
    );
    if let Err(e) = supervisor.run().await {
        error!("Supervisor: cannot install signal handlers: {e}");
        return ExitCode::FAILURE;
    }
    info!("upkwatch stopped");
    ExitCode::SUCCESS
}

async fn probe(config_path: Option<&Path>) -> ExitCode {
    let Some((_, config)) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let descriptor = match DeviceDescriptor::load(&config.descriptor_path()).await {
        Ok(d) => d,
        Err(e) => {
            eprintln!("upkwatch: {e}");
            return ExitCode::from(PROBE_UNHEALTHY);
        }
    };
    let mut device = HyperionClient::new(&descriptor.address, &config.device);
    match check_health(&mut device).await {
        Health::Healthy => {
            println!("{}: healthy", descriptor.address);
            ExitCode::SUCCESS
        }
        Health::Unhealthy(reason) => {
            println!("{}: unhealthy {reason}", descriptor.address);
            ExitCode::from(PROBE_UNHEALTHY)
        }
    }
}

fn check_config(config_path: Option<&Path>) -> ExitCode {
    let Some((path, config)) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    match toml::to_string_pretty(&config) {
        Ok(text) => {
            println!("# {} (resolved)", path.display());
            print!("{text}");
            if config.is_outdated() {
                eprintln!("upkwatch: config_version is older than {CONFIG_VERSION}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("upkwatch: cannot render config: {e}");
            ExitCode::FAILURE
        }
    }
}
