//! Lifecycle state of a protocol instance.
//!
//! ```text
//!  OPEN ──shutdown()──▶ DRAINING ──all ACKed / drain timeout──▶ CLOSED
//! ```
//!
//! Per-message progress (`ASSIGNED → SENT → ACKED`, `UNSEEN → BUFFERED →
//! DELIVERED`) lives in the window slots, not here.

/// All possible states of an [`crate::sr_connection::SrConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Accepting sends and processing arrivals.
    #[default]
    Open,
    /// `shutdown` is waiting for outstanding ACKs; new sends are rejected.
    Draining,
    /// Timers cancelled, background tasks stopped, transport released.
    Closed,
}

impl ConnectionState {
    /// `true` while the application may still hand over messages.
    pub fn accepts_sends(self) -> bool {
        self == ConnectionState::Open
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Open => "open",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
