//! Fault injection and an in-memory network for deterministic testing.
//!
//! Real networks drop, reorder, duplicate and corrupt datagrams.  To exercise
//! the reliability mechanisms without depending on actual network conditions,
//! this module provides:
//!
//! - [`FaultInjector`] — applies a [`FaultConfig`] to outbound packets using a
//!   seeded RNG, so a failing run can be replayed exactly.  Also used by
//!   [`crate::socket::UdpTransport`] to emulate a lossy link over loopback.
//! - [`SimTransport`] — a [`Transport`] backed by in-process channels.
//!   [`SimTransport::pair`] links two endpoints through the fault model;
//!   [`SimTransport::tap`] exposes the raw wire so a test can script every
//!   datagram by hand.
//!
//! | Fault       | Description                                          |
//! |-------------|------------------------------------------------------|
//! | Loss        | Drop a packet with probability `loss_rate`.          |
//! | Corruption  | Flip one random byte of the encoded datagram.        |
//! | Duplication | Deliver a packet twice.                              |
//! | Reordering  | Delay a packet by `reorder_delay` so later packets   |
//! |             | overtake it.                                         |

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};

use crate::packet::Packet;
use crate::transport::{Transport, TransportError};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`; values above 1 are
/// treated as 1.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a packet arrives with a damaged byte.
    pub corrupt_rate: f64,
    /// Probability that a packet is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a packet is held back by `reorder_delay`.
    pub reorder_rate: f64,
    /// Extra latency applied to reordered packets.
    pub reorder_delay: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
        }
    }
}

impl FaultConfig {
    /// Loss and corruption only: the failure model of the classic lab
    /// network layer.
    pub fn lossy(loss_rate: f64, corrupt_rate: f64) -> Self {
        Self {
            loss_rate,
            corrupt_rate,
            ..Self::default()
        }
    }

    /// `true` when no fault can ever trigger.
    pub fn is_clean(&self) -> bool {
        !(self.loss_rate > 0.0
            || self.corrupt_rate > 0.0
            || self.duplicate_rate > 0.0
            || self.reorder_rate > 0.0)
    }
}

/// Counters of the faults actually injected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub dropped: u64,
    pub corrupted: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

/// One copy of a packet headed for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub packet: Packet,
    /// Extra latency before the copy is released, `None` for immediate.
    pub delay: Option<Duration>,
}

/// Seeded fault model applied to outbound packets.
#[derive(Debug)]
pub struct FaultInjector {
    config: FaultConfig,
    rng: Mutex<StdRng>,
    dropped: AtomicU64,
    corrupted: AtomicU64,
    duplicated: AtomicU64,
    reordered: AtomicU64,
}

impl FaultInjector {
    /// Build an injector whose decisions are fully determined by `seed`.
    pub fn new(config: FaultConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    /// Build an injector seeded from the operating system.
    pub fn from_os_rng(config: FaultConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    fn with_rng(config: FaultConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng: Mutex::new(rng),
            dropped: AtomicU64::new(0),
            corrupted: AtomicU64::new(0),
            duplicated: AtomicU64::new(0),
            reordered: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    pub fn stats(&self) -> FaultStats {
        FaultStats {
            dropped: self.dropped.load(Ordering::Relaxed),
            corrupted: self.corrupted.load(Ordering::Relaxed),
            duplicated: self.duplicated.load(Ordering::Relaxed),
            reordered: self.reordered.load(Ordering::Relaxed),
        }
    }

    /// Run `packet` through the fault model.
    ///
    /// Returns zero copies (lost), one, or two (duplicated); each copy is
    /// independently subject to corruption and reordering.
    pub fn apply(&self, packet: &Packet) -> Vec<Delivery> {
        if self.config.is_clean() {
            return vec![Delivery {
                packet: packet.clone(),
                delay: None,
            }];
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if roll(&mut rng, self.config.loss_rate) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }

        let copies = if roll(&mut rng, self.config.duplicate_rate) {
            self.duplicated.fetch_add(1, Ordering::Relaxed);
            2
        } else {
            1
        };

        (0..copies)
            .map(|_| {
                let packet = if roll(&mut rng, self.config.corrupt_rate) {
                    self.corrupted.fetch_add(1, Ordering::Relaxed);
                    damage(&mut rng, packet)
                } else {
                    packet.clone()
                };
                let delay = if roll(&mut rng, self.config.reorder_rate) {
                    self.reordered.fetch_add(1, Ordering::Relaxed);
                    Some(self.config.reorder_delay)
                } else {
                    None
                };
                Delivery { packet, delay }
            })
            .collect()
    }
}

fn roll(rng: &mut StdRng, probability: f64) -> bool {
    probability > 0.0 && rng.random_bool(probability.min(1.0))
}

/// Flip one byte of the encoded datagram and decode it the way a receiver
/// would, so the corruption is detected by the real checksum.
fn damage(rng: &mut StdRng, packet: &Packet) -> Packet {
    let Ok(mut bytes) = packet.encode() else {
        return Packet::garbled();
    };
    let i = rng.random_range(0..bytes.len());
    bytes[i] ^= rng.random_range(1..=u8::MAX);
    match Packet::decode(&bytes) {
        Ok(decoded) => decoded,
        Err(_) => Packet::garbled(),
    }
}

// ---------------------------------------------------------------------------
// SimTransport
// ---------------------------------------------------------------------------

/// In-memory [`Transport`] endpoint.
#[derive(Debug)]
pub struct SimTransport {
    outbound: mpsc::UnboundedSender<Packet>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
    faults: FaultInjector,
    closed: watch::Sender<bool>,
}

/// Raw access to the far side of a [`SimTransport::tap`] endpoint.
#[derive(Debug)]
pub struct Tap {
    /// Every packet the endpoint sends, in order.
    pub sent: mpsc::UnboundedReceiver<Packet>,
    /// Packets pushed here are received by the endpoint.
    pub inject: mpsc::UnboundedSender<Packet>,
}

impl Tap {
    /// Wait for the next packet the endpoint transmits.
    pub async fn next_sent(&mut self) -> Option<Packet> {
        self.sent.recv().await
    }

    /// Everything transmitted so far that has not been read yet.
    pub fn drain_sent(&mut self) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Ok(p) = self.sent.try_recv() {
            out.push(p);
        }
        out
    }

    /// Deliver `packet` to the endpoint.
    pub fn deliver(&self, packet: Packet) {
        let _ = self.inject.send(packet);
    }
}

impl SimTransport {
    fn new(
        outbound: mpsc::UnboundedSender<Packet>,
        inbound: mpsc::UnboundedReceiver<Packet>,
        faults: FaultInjector,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            outbound,
            inbound: tokio::sync::Mutex::new(inbound),
            faults,
            closed,
        }
    }

    /// Two endpoints linked back to back through the fault model.
    ///
    /// Each direction draws from its own RNG stream derived from `seed`.
    pub fn pair(config: FaultConfig, seed: u64) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Self::new(a_tx, a_rx, FaultInjector::new(config.clone(), seed));
        let b = Self::new(
            b_tx,
            b_rx,
            FaultInjector::new(config, seed.wrapping_add(0x9e37_79b9)),
        );
        (a, b)
    }

    /// A fault-free endpoint whose wire is driven by the returned [`Tap`].
    pub fn tap() -> (Self, Tap) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let endpoint = Self::new(
            out_tx,
            in_rx,
            FaultInjector::new(FaultConfig::default(), 0),
        );
        (
            endpoint,
            Tap {
                sent: out_rx,
                inject: in_tx,
            },
        )
    }

    /// Faults injected on this endpoint's outbound direction.
    pub fn fault_stats(&self) -> FaultStats {
        self.faults.stats()
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for SimTransport {
    fn send(&self, packet: &Packet) {
        if self.is_closed() {
            return;
        }
        for delivery in self.faults.apply(packet) {
            match (delivery.delay, tokio::runtime::Handle::try_current()) {
                (Some(delay), Ok(handle)) => {
                    let tx = self.outbound.clone();
                    handle.spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(delivery.packet);
                    });
                }
                _ => {
                    let _ = self.outbound.send(delivery.packet);
                }
            }
        }
    }

    async fn recv(&self) -> Result<Packet, TransportError> {
        let mut closed = self.closed.subscribe();
        let already_closed = *closed.borrow_and_update();
        if already_closed {
            return Err(TransportError::Closed);
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            packet = inbound.recv() => packet.ok_or(TransportError::Closed),
            _ = closed.changed() => Err(TransportError::Closed),
        }
    }

    fn shutdown(&self) {
        self.closed.send_replace(true);
    }
}
