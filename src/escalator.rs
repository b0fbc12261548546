//! Device reboot with bounded retries.
//!
//! A reboot is attempted by power-cycling through the relay when one is
//! configured, falling back to a soft `#Reboot` over the command channel. The
//! escalator counts reboots after which the device still did not answer and
//! stops trying once that count reaches `max_unsuccessful`. A successful
//! reboot clears the count.
//!
//! The soft fallback is only taken while the outlet is known to be powered.
//! Once the pulse has cut power, a failed `turn_on` is retried a few times and
//! then remembered: every later call retries switching the outlet back on
//! before anything else, even when no reboot is requested or the budget is
//! spent.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::device::{check_health, DeviceClient, Health};
use crate::relay::{PowerRelay, RESET_PULSE};

/// `turn_on` attempts per power cycle.
pub const TURN_ON_ATTEMPTS: u32 = 3;
const TURN_ON_RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Result of [`RebootEscalator::maybe_reboot_device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootOutcome {
    /// No attempt: not requested, or the retry budget is spent.
    Skipped,
    /// The device answers after the reboot.
    Success,
    /// The device does not answer after the reboot.
    Failed,
}

enum PowerCycle {
    /// Power was never cut, the soft reboot may still be tried.
    Unavailable,
    Completed,
    /// Power was cut and could not be restored.
    OutletOff,
}

#[derive(Debug, Clone)]
pub struct RebootEscalator {
    max_unsuccessful: u32,
    unsuccessful: u32,
    reboot_duration: Duration,
    outlet: Option<u8>,
    outlet_off: bool,
}

impl RebootEscalator {
    /// `outlet` is the relay outlet feeding the device, `None` when there is
    /// no relay.
    pub fn new(max_unsuccessful: u32, reboot_duration: Duration, outlet: Option<u8>) -> Self {
        Self {
            max_unsuccessful,
            unsuccessful: 0,
            reboot_duration,
            outlet,
            outlet_off: false,
        }
    }

    pub fn unsuccessful(&self) -> u32 {
        self.unsuccessful
    }

    /// The last power cycle could not switch the outlet back on.
    pub fn outlet_left_off(&self) -> bool {
        self.outlet_off
    }

    /// Clear the unsuccessful count so reboots are attempted again.
    pub fn reset(&mut self) {
        if self.unsuccessful > 0 {
            info!(
                "Reboot: unsuccessful count reset (was {})",
                self.unsuccessful
            );
        }
        self.unsuccessful = 0;
    }

    /// Reboot the device if `allowed` and the retry budget permits.
    pub async fn maybe_reboot_device<D, R>(
        &mut self,
        allowed: bool,
        device: &mut D,
        mut relay: Option<&mut R>,
    ) -> RebootOutcome
    where
        D: DeviceClient,
        R: PowerRelay,
    {
        if self.outlet_off {
            self.restore_outlet(relay.as_deref_mut()).await;
        }
        if !allowed {
            return RebootOutcome::Skipped;
        }
        if self.unsuccessful >= self.max_unsuccessful {
            info!(
                "Reboot: skipped, {} unsuccessful reboots in a row (max {})",
                self.unsuccessful, self.max_unsuccessful
            );
            return RebootOutcome::Skipped;
        }

        let cycle = match (relay, self.outlet) {
            (Some(relay), Some(outlet)) => self.power_cycle(relay, outlet).await,
            _ => PowerCycle::Unavailable,
        };
        match cycle {
            PowerCycle::Unavailable => soft_reboot(device).await,
            PowerCycle::Completed => {}
            PowerCycle::OutletOff => {
                warn!("Reboot: device is unpowered, skipping the soft reboot");
            }
        }

        match check_health(device).await {
            Health::Healthy => {
                info!("Reboot: device is back");
                self.unsuccessful = 0;
                RebootOutcome::Success
            }
            Health::Unhealthy(reason) => {
                self.unsuccessful += 1;
                warn!(
                    "Reboot: device still unavailable ({reason}), unsuccessful reboots: {}/{}",
                    self.unsuccessful, self.max_unsuccessful
                );
                RebootOutcome::Failed
            }
        }
    }

    /// Cut and restore power, then wait for the device to boot.
    async fn power_cycle<R: PowerRelay>(&mut self, relay: &mut R, outlet: u8) -> PowerCycle {
        info!("Reboot: checking relay...");
        if let Err(e) = relay.check().await {
            warn!("Reboot: relay unavailable: {e}");
            return PowerCycle::Unavailable;
        }
        info!(
            "Reboot: power off outlet {outlet} for {}s",
            RESET_PULSE.as_secs()
        );
        if let Err(e) = relay.pulse(outlet, RESET_PULSE).await {
            warn!("Reboot: relay pulse failed: {e}");
            return PowerCycle::Unavailable;
        }
        if !switch_on(relay, outlet).await {
            self.outlet_off = true;
            error!(
                "Reboot: outlet {outlet} could not be switched back on, \
                 the device may be left powered off; retrying on the next restart"
            );
            return PowerCycle::OutletOff;
        }
        info!(
            "Reboot: power restored, waiting {:.0}s for the device",
            self.reboot_duration.as_secs_f64()
        );
        tokio::time::sleep(self.reboot_duration).await;
        PowerCycle::Completed
    }

    async fn restore_outlet<R: PowerRelay>(&mut self, relay: Option<&mut R>) {
        let (Some(relay), Some(outlet)) = (relay, self.outlet) else {
            return;
        };
        info!("Reboot: outlet {outlet} was left off, switching it on");
        if switch_on(relay, outlet).await {
            self.outlet_off = false;
            info!("Reboot: outlet {outlet} is on again");
        } else {
            error!("Reboot: outlet {outlet} is still off");
        }
    }
}

/// `turn_on` with up to [`TURN_ON_ATTEMPTS`] tries.
async fn switch_on<R: PowerRelay>(relay: &mut R, outlet: u8) -> bool {
    for attempt in 1..=TURN_ON_ATTEMPTS {
        match relay.turn_on(outlet).await {
            Ok(()) => return true,
            Err(e) => {
                warn!("Reboot: relay turn on failed (attempt {attempt}/{TURN_ON_ATTEMPTS}): {e}");
                if attempt < TURN_ON_ATTEMPTS {
                    tokio::time::sleep(TURN_ON_RETRY_PAUSE).await;
                }
            }
        }
    }
    false
}

async fn soft_reboot<D: DeviceClient>(device: &mut D) {
    info!("Reboot: soft reboot over the command channel");
    if !check_health(device).await.is_healthy() {
        warn!("Reboot: device does not answer, cannot send reboot command");
        return;
    }
    match device.reboot().await {
        Ok(()) => info!("Reboot: reboot command sent"),
        Err(e) => warn!("Reboot: reboot command failed: {e}"),
    }
}
