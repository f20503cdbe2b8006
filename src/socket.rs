//! UDP transport adapter.
//!
//! [`UdpTransport`] is a thin wrapper around `tokio::net::UdpSocket` that
//! speaks [`crate::packet::Packet`] instead of raw bytes.  The socket is
//! connected to a single fixed peer, so datagrams from anyone else are
//! filtered by the OS.  All protocol logic lives elsewhere; this module owns
//! only byte I/O (plus optional fault injection for demos over loopback).
//!
//! ```text
//!  send(&Packet) ──encode──▶ mpsc queue ──▶ writer task ──socket.send().await──▶ peer
//!  recv() ◀──decode── socket.recv().await ◀────────────────────────────────────── peer
//! ```
//!
//! `Transport::send` is synchronous, so outbound datagrams are queued and a
//! writer task awaits socket writability for each one.  A datagram is only
//! lost if the kernel refuses it outright.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use crate::packet::{Packet, MAX_DATAGRAM};
use crate::simulator::{Delivery, FaultInjector};
use crate::transport::{Transport, TransportError};

/// A packet-oriented UDP socket talking to one peer.
#[derive(Debug)]
pub struct UdpTransport {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    /// The only address datagrams are exchanged with.
    pub peer: SocketAddr,
    inner: Arc<UdpSocket>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    faults: Option<FaultInjector>,
    closed: watch::Sender<bool>,
}

impl UdpTransport {
    /// Bind to `local_addr`, connect to `peer` and start the writer task.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr, peer: SocketAddr) -> Result<Self, TransportError> {
        let inner = Arc::new(UdpSocket::bind(local_addr).await?);
        inner.connect(peer).await?;
        let local_addr = inner.local_addr()?;
        let (closed, _) = watch::channel(false);
        let (outbound, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(Arc::clone(&inner), queue, closed.subscribe()));
        log::debug!("[udp] bound {local_addr} ↔ {peer}");
        Ok(Self {
            local_addr,
            peer,
            inner,
            outbound,
            faults: None,
            closed,
        })
    }

    /// Run every outbound datagram through `faults` before it hits the wire.
    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = Some(faults);
        self
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Encode `packet` and hand it to the writer task.
fn enqueue(queue: &mpsc::UnboundedSender<Vec<u8>>, packet: &Packet) {
    match packet.encode() {
        Ok(bytes) => {
            // Fails only once the writer has stopped, i.e. after shutdown.
            let _ = queue.send(bytes);
        }
        Err(e) => log::warn!("[udp] dropping unencodable {packet}: {e}"),
    }
}

/// Write queued datagrams in order until the transport closes.
async fn write_loop(
    socket: Arc<UdpSocket>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        let bytes = tokio::select! {
            next = queue.recv() => match next {
                Some(bytes) => bytes,
                None => break,
            },
            _ = closed.changed() => break,
        };
        match socket.send(&bytes).await {
            Ok(_) => {}
            // ICMP port-unreachable from an earlier datagram; the peer is not up yet.
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                log::trace!("[udp] peer unreachable, {} byte datagram lost", bytes.len())
            }
            // Treated exactly like loss on the wire; the retransmit timer recovers.
            Err(e) => log::warn!("[udp] send of {} byte datagram failed: {e}", bytes.len()),
        }
    }
    log::trace!("[udp] writer finished");
}

#[async_trait]
impl Transport for UdpTransport {
    fn send(&self, packet: &Packet) {
        if self.is_closed() {
            return;
        }
        let deliveries = match &self.faults {
            Some(faults) => faults.apply(packet),
            None => vec![Delivery {
                packet: packet.clone(),
                delay: None,
            }],
        };
        for delivery in deliveries {
            match (delivery.delay, tokio::runtime::Handle::try_current()) {
                (Some(delay), Ok(handle)) => {
                    let queue = self.outbound.clone();
                    handle.spawn(async move {
                        tokio::time::sleep(delay).await;
                        enqueue(&queue, &delivery.packet);
                    });
                }
                _ => enqueue(&self.outbound, &delivery.packet),
            }
        }
    }

    async fn recv(&self) -> Result<Packet, TransportError> {
        let mut closed = self.closed.subscribe();
        let already_closed = *closed.borrow_and_update();
        if already_closed {
            return Err(TransportError::Closed);
        }
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                result = self.inner.recv(&mut buf) => match result {
                    Ok(n) => {
                        return Ok(Packet::decode(&buf[..n]).unwrap_or_else(|e| {
                            log::debug!("[udp] undecodable datagram ({n} bytes): {e}");
                            Packet::garbled()
                        }));
                    }
                    Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                        log::trace!("[udp] peer {} unreachable", self.peer);
                    }
                    Err(e) => return Err(e.into()),
                },
                _ = closed.changed() => return Err(TransportError::Closed),
            }
        }
    }

    fn shutdown(&self) {
        if !self.closed.send_replace(true) {
            log::debug!("[udp] {} closed", self.local_addr);
        }
    }
}
