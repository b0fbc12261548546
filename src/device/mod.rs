//! Instrument ("ITO") capability and health check.
//!
//! The supervisor only ever talks to the instrument through [`DeviceClient`].
//! [`hyperion::HyperionClient`] implements it over the instrument's TCP
//! command port; tests use in-memory fakes.

pub mod hyperion;

use std::fmt;

use chrono::NaiveDateTime;
use tracing::info;

use crate::error::DeviceError;

/// Commands the supervisor needs from the instrument.
///
/// Methods take `&mut self` because a client holds at most one command
/// session, opened by [`connect`](DeviceClient::connect).
#[allow(async_fn_in_trait)]
pub trait DeviceClient {
    /// Cheap reachability probe of the command port (short connect timeout).
    async fn probe_control_channel(&mut self) -> Result<(), DeviceError>;
    /// Open (or reopen) the command session.
    async fn connect(&mut self) -> Result<(), DeviceError>;
    /// Benign status query proving the instrument answers commands.
    async fn health_probe(&mut self) -> Result<(), DeviceError>;
    /// Latest full spectrum.
    async fn fetch_measurement(&mut self) -> Result<Spectrum, DeviceError>;
    /// Instrument clock (UTC).
    async fn instrument_time(&mut self) -> Result<NaiveDateTime, DeviceError>;
    /// Set the instrument clock (UTC).
    async fn set_clock(&mut self, utc: NaiveDateTime) -> Result<(), DeviceError>;
    /// Soft reboot through the command channel.
    async fn reboot(&mut self) -> Result<(), DeviceError>;
    /// PCB temperature in °C.
    async fn board_temperature(&mut self) -> Result<f64, DeviceError>;
}

/// One spectrum snapshot: a wavelength axis plus one power trace per channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Spectrum {
    /// Wavelengths in nm.
    pub wavelengths: Vec<f64>,
    /// Power in dBm, `channels[c][i]` at `wavelengths[i]`.
    pub channels: Vec<Vec<f64>>,
}

impl Spectrum {
    /// Tab-separated rows: wavelength followed by every channel's value.
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        for (i, wl) in self.wavelengths.iter().enumerate() {
            out.push_str(&wl.to_string());
            for channel in &self.channels {
                out.push('\t');
                if let Some(v) = channel.get(i) {
                    out.push_str(&v.to_string());
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Why the instrument is considered unhealthy, in probe order.
#[derive(Debug)]
pub enum UnhealthyReason {
    /// Command port did not accept a TCP connection.
    Unreachable(DeviceError),
    /// Port open but the command session could not be set up.
    InitFailed(DeviceError),
    /// Session open but the status query failed.
    NoResponse(DeviceError),
}

impl UnhealthyReason {
    /// Stable numeric code used in log lines (1 = no ping, 2 = init, 3 = query).
    pub fn code(&self) -> u8 {
        match self {
            Self::Unreachable(_) => 1,
            Self::InitFailed(_) => 2,
            Self::NoResponse(_) => 3,
        }
    }
}

impl fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(e) => write!(f, "({}) {e}", self.code()),
            Self::InitFailed(e) => write!(f, "({}) error during device init: {e}", self.code()),
            Self::NoResponse(e) => write!(f, "({}) no answer to status query: {e}", self.code()),
        }
    }
}

/// Result of [`check_health`].
#[derive(Debug)]
pub enum Health {
    Healthy,
    Unhealthy(UnhealthyReason),
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Probe the instrument: port, then session, then a status query.
///
/// The first failing stage determines the reason. On success the client is
/// left connected for follow-up commands.
pub async fn check_health<D: DeviceClient>(device: &mut D) -> Health {
    info!("Device: checking connection...");
    let health = if let Err(e) = device.probe_control_channel().await {
        Health::Unhealthy(UnhealthyReason::Unreachable(e))
    } else if let Err(e) = device.connect().await {
        Health::Unhealthy(UnhealthyReason::InitFailed(e))
    } else if let Err(e) = device.health_probe().await {
        Health::Unhealthy(UnhealthyReason::NoResponse(e))
    } else {
        Health::Healthy
    };

    match health {
        Health::Healthy => info!("Device: connection ok"),
        Health::Unhealthy(ref reason) => info!("Device: no connection: {reason}"),
    }
    health
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeDevice;

    #[tokio::test]
    async fn test_check_health_ok() {
        let mut device = FakeDevice::healthy();
        assert!(check_health(&mut device).await.is_healthy());
        let calls = device.calls();
        assert_eq!(calls, vec!["probe", "connect", "health_probe"]);
    }

    #[tokio::test]
    async fn test_check_health_unreachable_stops_early() {
        let mut device = FakeDevice::healthy();
        device.set_reachable(false);
        match check_health(&mut device).await {
            Health::Unhealthy(reason) => assert_eq!(reason.code(), 1),
            Health::Healthy => panic!("expected unhealthy"),
        }
        assert_eq!(device.calls(), vec!["probe"]);
    }

    #[tokio::test]
    async fn test_check_health_init_failure() {
        let mut device = FakeDevice::healthy();
        device.state().lock().unwrap().connect_fails = true;
        match check_health(&mut device).await {
            Health::Unhealthy(reason) => assert_eq!(reason.code(), 2),
            Health::Healthy => panic!("expected unhealthy"),
        }
    }

    #[tokio::test]
    async fn test_check_health_no_response() {
        let mut device = FakeDevice::healthy();
        device.state().lock().unwrap().probe_fails = true;
        match check_health(&mut device).await {
            Health::Unhealthy(reason) => {
                assert_eq!(reason.code(), 3);
                assert!(reason.to_string().contains("status query"));
            }
            Health::Healthy => panic!("expected unhealthy"),
        }
    }

    #[test]
    fn test_spectrum_to_tsv() {
        let spectrum = Spectrum {
            wavelengths: vec![1500.0, 1500.5],
            channels: vec![vec![-10.0, -11.5], vec![-20.0, -21.25]],
        };
        assert_eq!(spectrum.to_tsv(), "1500\t-10\t-20\n1500.5\t-11.5\t-21.25\n");
    }
}
