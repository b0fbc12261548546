//! The watchdog loop.
//!
//! One task ticks every second. Each tick first asks the periodic trigger
//! whether a scheduled restart is due, then, when a check interval has passed,
//! samples the data directory for the growth trigger. Restarts run inline, so
//! a tick that restarts lasts as long as the restart does and the next tick
//! is delayed rather than bunched up.
//!
//! SIGHUP clears the unsuccessful reboot count, so an operator who has fixed
//! the instrument can re-enable reboots without restarting the watchdog.

use std::path::PathBuf;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::device::DeviceClient;
use crate::measurement::MeasurementSource;
use crate::relay::PowerRelay;
use crate::restart::{RestartReport, Restarter};
use crate::service::ServiceController;
use crate::trigger::{GrowthDecision, GrowthTrigger, PeriodicTrigger};

const TICK: Duration = Duration::from_secs(1);

/// Which trigger asked for a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Periodic,
    Growth,
}

/// A restart performed during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired {
    pub trigger: TriggerKind,
    pub device_reboot: bool,
    pub report: RestartReport,
}

/// Where the growth trigger measures.
#[derive(Debug, Clone)]
pub struct DataFiles {
    pub dir: PathBuf,
    pub pattern: String,
}

pub struct Supervisor<D, R, S, M> {
    restarter: Restarter<D, R, S>,
    growth: GrowthTrigger,
    periodic: PeriodicTrigger,
    measurement: M,
    files: DataFiles,
}

impl<D, R, S, M> Supervisor<D, R, S, M>
where
    D: DeviceClient,
    R: PowerRelay,
    S: ServiceController,
    M: MeasurementSource,
{
    pub fn new(
        restarter: Restarter<D, R, S>,
        growth: GrowthTrigger,
        periodic: PeriodicTrigger,
        measurement: M,
        files: DataFiles,
    ) -> Self {
        Self {
            restarter,
            growth,
            periodic,
            measurement,
            files,
        }
    }

    pub fn growth(&self) -> &GrowthTrigger {
        &self.growth
    }

    pub fn restarter(&self) -> &Restarter<D, R, S> {
        &self.restarter
    }

    /// Re-enable device reboots after the unsuccessful budget was spent.
    pub fn reset_reboot_budget(&mut self) {
        self.restarter.escalator_mut().reset();
    }

    /// Evaluate both triggers once and perform any restart they ask for.
    pub async fn tick(&mut self, now: Instant) -> Vec<Fired> {
        let mut fired = Vec::new();

        if self.periodic.tick(now) {
            info!("Periodic: restart interval elapsed, restarting service");
            let report = self.restarter.restart(false).await;
            self.growth.reset_counters();
            fired.push(Fired {
                trigger: TriggerKind::Periodic,
                device_reboot: false,
                report,
            });
        }

        if self.growth.is_due(now) {
            if let Some(f) = self.check_growth(now).await {
                fired.push(f);
            }
        }
        fired
    }

    async fn check_growth(&mut self, now: Instant) -> Option<Fired> {
        let bytes = match self
            .measurement
            .total_size(&self.files.dir, &self.files.pattern)
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Growth: failed to measure data directory: {e}");
                return None;
            }
        };

        let threshold = self.growth.settings().threshold_mb_per_h;
        let needed = self.growth.settings().triggers_before_action;
        match self.growth.sample(now, bytes) {
            Err(e) => {
                warn!("Growth: {e}");
                None
            }
            Ok(GrowthDecision::Healthy { speed }) => {
                info!("Growth: {speed:.3} MB/h (threshold {threshold} MB/h)");
                None
            }
            Ok(GrowthDecision::Slow { speed, consecutive }) => {
                info!(
                    "Growth: {speed:.3} MB/h is below {threshold} MB/h ({consecutive}/{needed})"
                );
                None
            }
            Ok(GrowthDecision::Restart {
                speed,
                device_reboot,
            }) => {
                info!(
                    "Growth: {speed:.3} MB/h is below {threshold} MB/h ({needed}/{needed}), \
                     restarting service (device reboot: {device_reboot})"
                );
                let report = self.restarter.restart(device_reboot).await;
                self.growth.restart_completed();
                Some(Fired {
                    trigger: TriggerKind::Growth,
                    device_reboot,
                    report,
                })
            }
        }
    }

    /// Tick until SIGINT or SIGTERM. SIGHUP resets the reboot budget.
    pub async fn run(&mut self) -> std::io::Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Supervisor: running");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Instant::now()).await;
                }
                _ = sigint.recv() => {
                    info!("Supervisor: SIGINT received, stopping");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!("Supervisor: SIGTERM received, stopping");
                    return Ok(());
                }
                _ = sighup.recv() => {
                    info!("Supervisor: SIGHUP received, re-enabling device reboots");
                    self.reset_reboot_budget();
                }
            }
        }
    }
}
