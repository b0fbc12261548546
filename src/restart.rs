//! The restart routine shared by both triggers.
//!
//! ```text
//!  stop service ──► settle pause ──► reboot device? ──► device healthy?
//!                                        │ Failed          │ yes: snapshot,
//!                                        ▼                 │ clock, temperature
//!                                   start service ◄────────┘
//! ```
//!
//! Each stage handles its own failure and the routine always ends by
//! starting the service.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::clock::{self, ClockSource};
use crate::config::Config;
use crate::device::{check_health, DeviceClient};
use crate::escalator::{RebootEscalator, RebootOutcome};
use crate::relay::PowerRelay;
use crate::service::ServiceController;
use crate::snapshot;

/// Fixed parameters of the restart routine.
#[derive(Debug, Clone)]
pub struct RestartSettings {
    pub service_name: String,
    /// Pause after stopping the service.
    pub settle_pause: Duration,
    pub data_dir: PathBuf,
    pub clock_source: ClockSource,
    pub osm_log_template: String,
}

impl RestartSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            service_name: config.trigger1.service_name.clone(),
            settle_pause: config.service_stop_pause(),
            data_dir: config.trigger1.data_dir.clone(),
            clock_source: config.clock_source(),
            osm_log_template: config.osm_log_template(),
        }
    }
}

/// What one run of the routine did. `None` marks a stage that failed or was
/// skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartReport {
    pub stop_code: Option<i32>,
    pub reboot: RebootOutcome,
    pub snapshot: Option<PathBuf>,
    pub clock_set: Option<NaiveDateTime>,
    pub start_code: Option<i32>,
}

/// Owns every collaborator the routine touches.
pub struct Restarter<D, R, S> {
    device: D,
    relay: Option<R>,
    service: S,
    escalator: RebootEscalator,
    settings: RestartSettings,
}

impl<D, R, S> Restarter<D, R, S>
where
    D: DeviceClient,
    R: PowerRelay,
    S: ServiceController,
{
    pub fn new(
        device: D,
        relay: Option<R>,
        service: S,
        escalator: RebootEscalator,
        settings: RestartSettings,
    ) -> Self {
        Self {
            device,
            relay,
            service,
            escalator,
            settings,
        }
    }

    pub fn escalator(&self) -> &RebootEscalator {
        &self.escalator
    }

    pub fn escalator_mut(&mut self) -> &mut RebootEscalator {
        &mut self.escalator
    }

    pub fn settings(&self) -> &RestartSettings {
        &self.settings
    }

    /// Stop the service, optionally reboot the device, refresh the device
    /// state, and start the service again.
    pub async fn restart(&mut self, device_reboot: bool) -> RestartReport {
        let name = self.settings.service_name.clone();

        info!("Restart: stopping service {name}");
        let stop_code = match self.service.stop(&name).await {
            Ok(code) => {
                info!("Restart: stop {name} exited with {code}");
                Some(code)
            }
            Err(e) => {
                warn!("Restart: failed to stop {name}: {e}");
                None
            }
        };
        info!(
            "Restart: waiting {:.0}s after stopping the service",
            self.settings.settle_pause.as_secs_f64()
        );
        tokio::time::sleep(self.settings.settle_pause).await;

        let reboot = self
            .escalator
            .maybe_reboot_device(device_reboot, &mut self.device, self.relay.as_mut())
            .await;

        let mut snapshot = None;
        let mut clock_set = None;
        if reboot == RebootOutcome::Failed {
            warn!("Restart: device reboot failed, skipping device refresh");
        } else if check_health(&mut self.device).await.is_healthy() {
            snapshot = self.save_snapshot().await;
            clock_set = self.sync_clock().await;
            self.log_temperature().await;
        }

        info!("Restart: starting service {name}");
        let start_code = match self.service.start(&name).await {
            Ok(code) => {
                info!("Restart: start {name} exited with {code}");
                Some(code)
            }
            Err(e) => {
                warn!("Restart: failed to start {name}: {e}");
                None
            }
        };

        RestartReport {
            stop_code,
            reboot,
            snapshot,
            clock_set,
            start_code,
        }
    }

    async fn save_snapshot(&mut self) -> Option<PathBuf> {
        let spectrum = match self.device.fetch_measurement().await {
            Ok(spectrum) => spectrum,
            Err(e) => {
                warn!("Restart: failed to fetch spectrum: {e}");
                return None;
            }
        };
        match snapshot::save_spectrum(&self.settings.data_dir, &spectrum, Local::now().naive_local())
            .await
        {
            Ok(path) => {
                info!("Restart: spectrum saved to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Restart: failed to save spectrum: {e}");
                None
            }
        }
    }

    async fn sync_clock(&mut self) -> Option<NaiveDateTime> {
        let utc_now = Utc::now().naive_utc();
        match self.device.instrument_time().await {
            Ok(t) => info!(
                "Clock: device time {} (offset {}s from supervisor UTC)",
                clock::display_time(t),
                clock::drift(t, utc_now).num_seconds()
            ),
            Err(e) => warn!("Clock: failed to read device time: {e}"),
        }

        let target = clock::target_time(
            self.settings.clock_source,
            &self.settings.data_dir,
            &self.settings.osm_log_template,
            Local::now().naive_local(),
            utc_now,
        )?;
        match self.device.set_clock(target).await {
            Ok(()) => {
                info!("Clock: device time set to {}", clock::display_time(target));
                Some(target)
            }
            Err(e) => {
                warn!("Clock: failed to set device time: {e}");
                None
            }
        }
    }

    async fn log_temperature(&mut self) {
        match self.device.board_temperature().await {
            Ok(t) => info!("Device: board temperature {t:.1}°C"),
            Err(e) => warn!("Device: failed to read board temperature: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{journal, FakeDevice, FakeRelay, FakeService, Journal};

    type TestRestarter = Restarter<FakeDevice, FakeRelay, FakeService>;

    fn settings(dir: &std::path::Path, clock_source: ClockSource) -> RestartSettings {
        RestartSettings {
            service_name: "upk".to_string(),
            settle_pause: Duration::from_secs(10),
            data_dir: dir.to_path_buf(),
            clock_source,
            osm_log_template: "UPK_server_*.log".to_string(),
        }
    }

    fn restarter(
        dir: &std::path::Path,
        j: &Journal,
    ) -> (TestRestarter, FakeDevice, FakeService) {
        let device = FakeDevice::with_journal(j.clone());
        let service = FakeService::new(j.clone());
        let handle_service = service.clone();
        let r = Restarter::new(
            device.clone(),
            None,
            service,
            RebootEscalator::new(3, Duration::from_secs(40), Some(1)),
            settings(dir, ClockSource::SupervisorUtc),
        );
        (r, device, handle_service)
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_restart_order() {
        let dir = tempfile::tempdir().unwrap();
        let j = journal();
        let (mut r, device, _) = restarter(dir.path(), &j);

        let started = tokio::time::Instant::now();
        let report = r.restart(false).await;
        assert!(started.elapsed() >= Duration::from_secs(10));

        assert_eq!(report.stop_code, Some(0));
        assert_eq!(report.start_code, Some(0));
        assert_eq!(report.reboot, RebootOutcome::Skipped);
        assert!(report.snapshot.as_ref().is_some_and(|p| p.exists()));
        assert!(report.clock_set.is_some());
        assert_eq!(device.state().lock().unwrap().clock, report.clock_set);

        let entries = j.lock().unwrap().clone();
        assert_eq!(entries.first().map(String::as_str), Some("service.stop(upk)"));
        assert_eq!(entries.last().map(String::as_str), Some("service.start(upk)"));
        assert!(entries.contains(&"device.fetch_measurement".to_string()));
        assert!(entries.contains(&"device.board_temperature".to_string()));
        assert!(!entries.contains(&"device.reboot".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reboot_skips_refresh_but_starts_service() {
        let dir = tempfile::tempdir().unwrap();
        let j = journal();
        let (mut r, device, service) = restarter(dir.path(), &j);
        device.set_reachable(false);

        let report = r.restart(true).await;
        assert_eq!(report.reboot, RebootOutcome::Failed);
        assert_eq!(report.snapshot, None);
        assert_eq!(report.clock_set, None);
        assert_eq!(report.start_code, Some(0));
        assert_eq!(r.escalator().unsuccessful(), 1);
        assert!(!device.calls().contains(&"fetch_measurement"));
        assert_eq!(
            service.state().lock().unwrap().calls,
            vec!["stop(upk)", "start(upk)"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_via_relay_then_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let j = journal();
        let (mut r, device, _) = restarter(dir.path(), &j);
        device.set_reachable(false);
        let relay = FakeRelay::new(j.clone()).restoring(&device);
        let relay_state = relay.state();
        r.relay = Some(relay);

        let report = r.restart(true).await;
        assert_eq!(report.reboot, RebootOutcome::Success);
        assert!(report.snapshot.is_some());
        assert_eq!(relay_state.lock().unwrap().calls.len(), 3);

        let entries = j.lock().unwrap().clone();
        let stop = entries.iter().position(|e| e == "service.stop(upk)").unwrap();
        let check = entries.iter().position(|e| e == "relay.check").unwrap();
        let fetch = entries.iter().position(|e| e == "device.fetch_measurement").unwrap();
        let start = entries.iter().position(|e| e == "service.start(upk)").unwrap();
        assert!(stop < check && check < fetch && fetch < start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let j = journal();
        let (mut r, device, service) = restarter(dir.path(), &j);
        {
            let state = device.state();
            let mut state = state.lock().unwrap();
            state.fetch_fails = true;
            state.set_clock_fails = true;
            state.temperature_fails = true;
        }
        service.state().lock().unwrap().stop_fails = true;

        let report = r.restart(false).await;
        assert_eq!(report.stop_code, None);
        assert_eq!(report.snapshot, None);
        assert_eq!(report.clock_set, None);
        assert_eq!(report.start_code, Some(0));
        assert!(device.calls().contains(&"board_temperature"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let j = journal();
        let (mut r, _device, service) = restarter(dir.path(), &j);
        service.state().lock().unwrap().start_fails = true;

        let report = r.restart(false).await;
        assert_eq!(report.stop_code, Some(0));
        assert_eq!(report.start_code, None);
        assert_eq!(
            service.state().lock().unwrap().calls,
            vec!["stop(upk)", "start(upk)"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_device_clock_is_still_set() {
        let dir = tempfile::tempdir().unwrap();
        let j = journal();
        let (mut r, device, _service) = restarter(dir.path(), &j);
        device.state().lock().unwrap().clock_fails = true;

        let report = r.restart(false).await;
        let set = report.clock_set.expect("clock set despite failed read");
        assert_eq!(device.state().lock().unwrap().clock, Some(set));
        let calls = device.calls();
        let read = calls.iter().position(|c| *c == "instrument_time").unwrap();
        let write = calls.iter().position(|c| *c == "set_clock").unwrap();
        assert!(read < write);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_sync_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let j = journal();
        let (mut r, device, _) = restarter(dir.path(), &j);
        r.settings.clock_source = ClockSource::Disabled;

        let report = r.restart(false).await;
        assert_eq!(report.clock_set, None);
        assert!(!device.calls().contains(&"set_clock"));
        assert!(report.snapshot.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_device_without_reboot_request() {
        let dir = tempfile::tempdir().unwrap();
        let j = journal();
        let (mut r, device, _) = restarter(dir.path(), &j);
        device.set_reachable(false);

        let report = r.restart(false).await;
        assert_eq!(report.reboot, RebootOutcome::Skipped);
        assert_eq!(report.snapshot, None);
        assert_eq!(report.start_code, Some(0));
        assert_eq!(r.escalator().unsuccessful(), 0);
    }
}
