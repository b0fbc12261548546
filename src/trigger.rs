//! Restart triggers.
//!
//! [`GrowthTrigger`] turns periodic directory-size samples into a two-level
//! hysteresis: N consecutive slow samples restart the service, and every
//! R-th consecutive growth restart also asks for a device reboot.
//! [`PeriodicTrigger`] restarts unconditionally on a fixed interval.
//!
//! Both are pure state machines over [`Instant`]s; the supervisor loop owns
//! them and performs the actual restarts.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::TimingError;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SECS_PER_HOUR: f64 = 3600.0;

/// Thresholds for [`GrowthTrigger`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthSettings {
    /// Growth below this speed (MB/hour) is slow.
    pub threshold_mb_per_h: f64,
    /// Minimum time between two samples.
    pub check_interval: Duration,
    /// Consecutive slow samples before a restart.
    pub triggers_before_action: u32,
    /// Growth restarts between device reboots (0 = never reboot).
    pub restarts_per_device_reboot: u32,
}

/// Outcome of one growth sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GrowthDecision {
    /// Growth at or above the threshold (or the directory shrank).
    Healthy { speed: f64 },
    /// Slow growth, not yet enough in a row to act.
    Slow { speed: f64, consecutive: u32 },
    /// Restart the service, and the device too when `device_reboot` is set.
    Restart { speed: f64, device_reboot: bool },
}

/// Data-directory growth watchdog.
#[derive(Debug, Clone)]
pub struct GrowthTrigger {
    settings: GrowthSettings,
    last_sample_at: Instant,
    last_bytes: u64,
    consecutive_slow: u32,
    consecutive_restarts: u32,
}

impl GrowthTrigger {
    /// Start from a baseline sample taken at `now`.
    pub fn new(settings: GrowthSettings, now: Instant, baseline_bytes: u64) -> Self {
        Self {
            settings,
            last_sample_at: now,
            last_bytes: baseline_bytes,
            consecutive_slow: 0,
            consecutive_restarts: 0,
        }
    }

    /// Whether a check interval has passed since the last accepted sample.
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_sample_at) >= self.settings.check_interval
            && now >= self.last_sample_at
    }

    /// Feed a new directory size.
    ///
    /// A sample taken at or before the previous one is rejected and leaves
    /// the state untouched.
    pub fn sample(&mut self, now: Instant, total_bytes: u64) -> Result<GrowthDecision, TimingError> {
        let elapsed = match now.checked_duration_since(self.last_sample_at) {
            Some(d) if !d.is_zero() => d.as_secs_f64(),
            Some(_) => return Err(TimingError { elapsed_secs: 0.0 }),
            None => {
                return Err(TimingError {
                    elapsed_secs: -self.last_sample_at.duration_since(now).as_secs_f64(),
                })
            }
        };

        #[allow(clippy::cast_precision_loss)]
        let delta = total_bytes as f64 - self.last_bytes as f64;
        let speed = SECS_PER_HOUR / BYTES_PER_MB * delta / elapsed;

        self.last_sample_at = now;
        self.last_bytes = total_bytes;

        if !(0.0..self.settings.threshold_mb_per_h).contains(&speed) {
            // The slow count is only cleared by a release, not by one good sample.
            self.consecutive_restarts = 0;
            return Ok(GrowthDecision::Healthy { speed });
        }

        self.consecutive_slow += 1;
        if self.consecutive_slow < self.settings.triggers_before_action {
            return Ok(GrowthDecision::Slow {
                speed,
                consecutive: self.consecutive_slow,
            });
        }

        self.consecutive_slow = 0;
        let ratio = self.settings.restarts_per_device_reboot;
        let device_reboot = ratio > 0 && self.consecutive_restarts >= ratio;
        if device_reboot {
            self.consecutive_restarts = 0;
        }
        Ok(GrowthDecision::Restart {
            speed,
            device_reboot,
        })
    }

    /// Count a finished growth restart towards the next device reboot.
    pub fn restart_completed(&mut self) {
        self.consecutive_restarts = self.consecutive_restarts.saturating_add(1);
    }

    /// Forget all escalation progress (used after a periodic restart).
    pub fn reset_counters(&mut self) {
        self.consecutive_slow = 0;
        self.consecutive_restarts = 0;
    }

    pub fn consecutive_slow(&self) -> u32 {
        self.consecutive_slow
    }

    pub fn consecutive_restarts(&self) -> u32 {
        self.consecutive_restarts
    }

    pub fn settings(&self) -> &GrowthSettings {
        &self.settings
    }
}

/// Unconditional restart timer.
#[derive(Debug, Clone)]
pub struct PeriodicTrigger {
    interval: Duration,
    last_fire: Instant,
}

impl PeriodicTrigger {
    /// `interval` of zero disables the trigger.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_fire: now,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Returns true (and rearms) when the interval has elapsed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if now.saturating_duration_since(self.last_fire) >= self.interval {
            self.last_fire = now;
            return true;
        }
        false
    }

    pub fn last_fire(&self) -> Instant {
        self.last_fire
    }
}
