//! Display capability: enumerate monitors, read and change display modes
//!
//! The switcher only talks to [`DisplayBackend`]. The X11 RandR implementation
//! lives in [`randr`].

pub mod randr;

use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::constants;
use crate::error::{DisplayError, ModeChangeError};
use crate::types::{MonitorInfo, MonitorKey, Resolution};

pub use randr::RandrDisplay;

/// Platform display operations consumed by the switcher
pub trait DisplayBackend {
    /// All usable monitors. Enumeration failures yield an empty list.
    fn list_monitors(&self) -> Vec<MonitorInfo>;

    /// Mode the monitor is currently running
    fn current_mode(&self, monitor: &MonitorKey) -> Result<Resolution, DisplayError>;

    /// Every mode the monitor advertises (diagnostics only)
    fn supported_modes(&self, monitor: &MonitorKey) -> Result<Vec<Resolution>, DisplayError>;

    /// Single attempt at switching the monitor to `resolution`
    fn set_mode(&self, monitor: &MonitorKey, resolution: Resolution) -> Result<(), ModeChangeError>;
}

/// Bounded, blocking retry for mode changes
///
/// Transient failures are retried up to `attempts` times in total with a fixed
/// `delay` between tries. Terminal failures return immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: constants::retry::MAX_ATTEMPTS,
            delay: constants::retry::DELAY,
        }
    }
}

impl RetryPolicy {
    /// No pause between attempts
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn apply(
        &self,
        display: &dyn DisplayBackend,
        monitor: &MonitorKey,
        resolution: Resolution,
    ) -> Result<(), ModeChangeError> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match display.set_mode(monitor, resolution) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind.is_transient() && attempt < attempts => {
                    warn!(
                        monitor = %monitor,
                        resolution = %resolution,
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Mode change attempt failed, retrying"
                    );
                    attempt += 1;
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
