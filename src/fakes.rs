//! In-memory collaborators for tests.
//!
//! Every fake keeps its state behind an `Arc<Mutex<_>>` so a test can keep a
//! handle after moving the fake into the code under test, and writes each
//! call into a shared [`Journal`] to check cross-collaborator ordering.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::device::{DeviceClient, Spectrum};
use crate::error::{DeviceError, MeasurementError, RelayError, ServiceError};
use crate::measurement::MeasurementSource;
use crate::relay::PowerRelay;
use crate::service::ServiceController;

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

fn unreachable() -> DeviceError {
    DeviceError::Unreachable {
        address: "fake".to_string(),
        reason: "connection refused".to_string(),
    }
}

// ── Device ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeDeviceState {
    pub reachable: bool,
    pub connect_fails: bool,
    pub probe_fails: bool,
    pub fetch_fails: bool,
    pub clock_fails: bool,
    pub set_clock_fails: bool,
    pub temperature_fails: bool,
    pub calls: Vec<&'static str>,
    pub clock: Option<NaiveDateTime>,
    pub reboots: u32,
}

#[derive(Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeDeviceState>>,
    journal: Journal,
}

impl FakeDevice {
    pub fn healthy() -> Self {
        Self::with_journal(journal())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeDeviceState {
                reachable: true,
                ..FakeDeviceState::default()
            })),
            journal,
        }
    }

    pub fn state(&self) -> Arc<Mutex<FakeDeviceState>> {
        Arc::clone(&self.state)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    fn call(&self, name: &'static str) -> std::sync::MutexGuard<'_, FakeDeviceState> {
        record(&self.journal, format!("device.{name}"));
        let mut state = self.state.lock().unwrap();
        state.calls.push(name);
        state
    }
}

impl DeviceClient for FakeDevice {
    async fn probe_control_channel(&mut self) -> Result<(), DeviceError> {
        let state = self.call("probe");
        if state.reachable {
            Ok(())
        } else {
            Err(unreachable())
        }
    }

    async fn connect(&mut self) -> Result<(), DeviceError> {
        let state = self.call("connect");
        if !state.reachable {
            Err(unreachable())
        } else if state.connect_fails {
            Err(DeviceError::NotConnected)
        } else {
            Ok(())
        }
    }

    async fn health_probe(&mut self) -> Result<(), DeviceError> {
        let state = self.call("health_probe");
        if state.reachable && !state.probe_fails {
            Ok(())
        } else {
            Err(DeviceError::Timeout("#GetChannelDetectionSettingIds".to_string()))
        }
    }

    async fn fetch_measurement(&mut self) -> Result<Spectrum, DeviceError> {
        let state = self.call("fetch_measurement");
        if state.fetch_fails {
            return Err(DeviceError::Malformed {
                command: "#GetSpectrum".to_string(),
                reason: "short content".to_string(),
            });
        }
        Ok(Spectrum {
            wavelengths: vec![1510.0, 1510.5],
            channels: vec![vec![-30.0, -31.0]],
        })
    }

    async fn instrument_time(&mut self) -> Result<NaiveDateTime, DeviceError> {
        let state = self.call("instrument_time");
        if state.clock_fails {
            return Err(DeviceError::NotConnected);
        }
        Ok(state.clock.unwrap_or_default())
    }

    async fn set_clock(&mut self, utc: NaiveDateTime) -> Result<(), DeviceError> {
        let mut state = self.call("set_clock");
        if state.set_clock_fails {
            return Err(DeviceError::NotConnected);
        }
        state.clock = Some(utc);
        Ok(())
    }

    async fn reboot(&mut self) -> Result<(), DeviceError> {
        let mut state = self.call("reboot");
        state.reboots += 1;
        Ok(())
    }

    async fn board_temperature(&mut self) -> Result<f64, DeviceError> {
        let state = self.call("board_temperature");
        if state.temperature_fails {
            Err(DeviceError::NotConnected)
        } else {
            Ok(41.5)
        }
    }
}

// ── Relay ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeRelayState {
    pub check_fails: bool,
    pub pulse_fails: bool,
    /// Number of upcoming `turn_on` calls that fail.
    pub turn_on_failures: u32,
    pub calls: Vec<String>,
}

#[derive(Clone)]
pub struct FakeRelay {
    state: Arc<Mutex<FakeRelayState>>,
    journal: Journal,
    /// Device brought back by a completed power cycle.
    restores: Option<Arc<Mutex<FakeDeviceState>>>,
}

impl FakeRelay {
    pub fn new(journal: Journal) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeRelayState::default())),
            journal,
            restores: None,
        }
    }

    /// A completed power cycle (`turn_on`) makes `device` reachable again.
    pub fn restoring(mut self, device: &FakeDevice) -> Self {
        self.restores = Some(device.state());
        self
    }

    pub fn state(&self) -> Arc<Mutex<FakeRelayState>> {
        Arc::clone(&self.state)
    }

    fn call(&self, entry: String) -> std::sync::MutexGuard<'_, FakeRelayState> {
        record(&self.journal, format!("relay.{entry}"));
        let mut state = self.state.lock().unwrap();
        state.calls.push(entry);
        state
    }
}

impl PowerRelay for FakeRelay {
    async fn check(&mut self) -> Result<(), RelayError> {
        let state = self.call("check".to_string());
        if state.check_fails {
            Err(RelayError::Timeout("http://fake/relay.cgi?r1".to_string()))
        } else {
            Ok(())
        }
    }

    async fn pulse(&mut self, outlet: u8, width: Duration) -> Result<(), RelayError> {
        let fails = self
            .call(format!("pulse({outlet},{})", width.as_secs()))
            .pulse_fails;
        if fails {
            return Err(RelayError::Status { status: 500 });
        }
        tokio::time::sleep(width).await;
        Ok(())
    }

    async fn turn_on(&mut self, outlet: u8) -> Result<(), RelayError> {
        {
            let mut state = self.call(format!("turn_on({outlet})"));
            if state.turn_on_failures > 0 {
                state.turn_on_failures -= 1;
                return Err(RelayError::Status { status: 500 });
            }
        }
        if let Some(ref device) = self.restores {
            device.lock().unwrap().reachable = true;
        }
        Ok(())
    }
}

// ── Service ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeServiceState {
    pub stop_code: i32,
    pub start_code: i32,
    pub stop_fails: bool,
    pub start_fails: bool,
    pub calls: Vec<String>,
}

#[derive(Clone)]
pub struct FakeService {
    state: Arc<Mutex<FakeServiceState>>,
    journal: Journal,
}

impl FakeService {
    pub fn new(journal: Journal) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeServiceState::default())),
            journal,
        }
    }

    pub fn state(&self) -> Arc<Mutex<FakeServiceState>> {
        Arc::clone(&self.state)
    }
}

impl ServiceController for FakeService {
    async fn stop(&mut self, name: &str) -> Result<i32, ServiceError> {
        record(&self.journal, format!("service.stop({name})"));
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("stop({name})"));
        if state.stop_fails {
            Err(ServiceError::SpawnFailed("No such file or directory".to_string()))
        } else {
            Ok(state.stop_code)
        }
    }

    async fn start(&mut self, name: &str) -> Result<i32, ServiceError> {
        record(&self.journal, format!("service.start({name})"));
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("start({name})"));
        if state.start_fails {
            Err(ServiceError::Timeout)
        } else {
            Ok(state.start_code)
        }
    }
}

// ── Measurement ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeMeasurementState {
    pub bytes: u64,
    pub fails: bool,
    pub reads: u32,
}

#[derive(Clone, Default)]
pub struct FakeMeasurement {
    state: Arc<Mutex<FakeMeasurementState>>,
}

impl FakeMeasurement {
    pub fn state(&self) -> Arc<Mutex<FakeMeasurementState>> {
        Arc::clone(&self.state)
    }

    pub fn grow(&self, bytes: u64) {
        self.state.lock().unwrap().bytes += bytes;
    }
}

impl MeasurementSource for FakeMeasurement {
    fn total_size(&self, _dir: &Path, pattern: &str) -> Result<u64, MeasurementError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        if state.fails {
            Err(MeasurementError::Pattern {
                pattern: pattern.to_string(),
                reason: "scan failed".to_string(),
            })
        } else {
            Ok(state.bytes)
        }
    }
}
