//! Protocol parameters.
//!
//! [`Config`] carries everything that parameterises one protocol instance:
//! the window size shared by both directions, the fixed retransmission
//! interval, and the bounds on the shutdown drain.  Defaults follow the
//! classic lab setup (a window of 10 and a sub-second timeout).

use std::time::Duration;

use thiserror::Error;

/// Largest accepted window.  Keeps the window far below half the `u32`
/// sequence space so wrap-around comparisons stay unambiguous.
pub const MAX_WINDOW: usize = u16::MAX as usize;

/// Adjustable protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Slot-array length for both the send and the receive window.
    pub window_size: usize,
    /// Retransmission interval.  Fixed: no back-off.
    pub timeout: Duration,
    /// Sleep between checks while `shutdown` waits for outstanding ACKs.
    pub drain_poll: Duration,
    /// Upper bound on the shutdown drain before giving up.
    pub drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: 10,
            timeout: Duration::from_millis(150),
            drain_poll: Duration::from_millis(50),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Reject parameters the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.window_size > MAX_WINDOW {
            return Err(ConfigError::WindowTooLarge(self.window_size));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.drain_poll.is_zero() {
            return Err(ConfigError::ZeroDrainPoll);
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("window size {0} exceeds the maximum of 65535")]
    WindowTooLarge(usize),
    #[error("retransmission timeout must be non-zero")]
    ZeroTimeout,
    #[error("drain poll interval must be non-zero")]
    ZeroDrainPoll,
}
