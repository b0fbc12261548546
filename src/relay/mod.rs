//! Network power relay used to hard power-cycle the instrument.

pub mod netping;

use std::time::Duration;

use crate::error::RelayError;

/// Width of the power-off pulse used to reboot the instrument.
pub const RESET_PULSE: Duration = Duration::from_secs(20);

/// Remote-controlled power outlets.
#[allow(async_fn_in_trait)]
pub trait PowerRelay {
    /// Verify the relay answers.
    async fn check(&mut self) -> Result<(), RelayError>;
    /// Cut power to `outlet` for `width`.
    async fn pulse(&mut self, outlet: u8, width: Duration) -> Result<(), RelayError>;
    /// Switch `outlet` on.
    async fn turn_on(&mut self, outlet: u8) -> Result<(), RelayError>;
}
