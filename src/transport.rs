//! The unreliable datagram transport the protocol runs on.
//!
//! A [`Transport`] moves whole [`Packet`]s between two fixed endpoints with no
//! guarantees: datagrams may be lost, duplicated, reordered or corrupted.
//! Corruption is detected by the transport and reported through
//! [`Packet::corrupt`]; everything else is the protocol's problem.
//!
//! # Implementations
//!
//! - [`crate::socket::UdpTransport`] (production): a connected tokio UDP socket.
//! - [`crate::simulator::SimTransport`] (testing): an in-memory link with
//!   seeded fault injection.

use async_trait::async_trait;
use thiserror::Error;

use crate::packet::Packet;

/// Errors surfaced by [`Transport::recv`].
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
}

/// Best-effort datagram transport between two fixed peers.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hand `packet` to the network.
    ///
    /// Never blocks and never fails: a datagram that cannot be sent is
    /// indistinguishable from one lost in transit, so implementations log the
    /// failure and move on.
    fn send(&self, packet: &Packet);

    /// Wait for the next datagram from the peer.
    ///
    /// Datagrams that fail the integrity check are returned with `corrupt`
    /// set.  Returns [`TransportError::Closed`] once [`shutdown`] has been
    /// called.
    ///
    /// [`shutdown`]: Transport::shutdown
    async fn recv(&self) -> Result<Packet, TransportError>;

    /// Release the underlying resource.  Idempotent.
    fn shutdown(&self);
}
