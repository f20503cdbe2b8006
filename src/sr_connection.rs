//! Selective Repeat protocol instance: dispatcher, timer service, shutdown.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ send(msg) -> bool                      handler(msg)
//!      ▼                                             ▲
//!  SrConnection ───────────────┐                     │
//!    │                         │            receive task (Dispatcher)
//!    │  Mutex<Outbound>        │              ├── ACK  → SrSender::on_ack
//!    │   ├── SrSender          │◀─────────────┤
//!    │   └── ConnectionState   │              └── DATA → SrReceiver::on_data
//!    │           ▲             │                            │ ACK
//!    │     timer task          │                            ▼
//!    │   (TimerWheel service)  └────────────▶  Transport (UDP / simulator)
//! ```
//!
//! - The **sender** side is shared by the application's `send`, the timer
//!   task and ACK handling, and is serialised by one `std::sync::Mutex`.
//!   Transmissions triggered while mutating sender state happen under that
//!   lock, so a window slide and a timer cancel are atomic with respect to a
//!   concurrent timeout.
//! - The **receiver** side is owned outright by the receive task, which
//!   processes one arrival at a time, so it needs no lock.
//! - The **timer task** sleeps until the earliest retransmission deadline and
//!   is woken through a [`Notify`] whenever `send` arms a new timer.
//!
//! # Usage
//!
//! ```ignore
//! let (a, b) = SimTransport::pair(FaultConfig::lossy(0.1, 0.1), 7);
//! let (alice, _) = SrConnection::start_with_channel(a, Config::default())?;
//! let (bob, mut inbox) = SrConnection::start_with_channel(b, Config::default())?;
//! assert!(alice.send(b"hello".to_vec()));
//! assert_eq!(inbox.recv().await.unwrap(), b"hello");
//! alice.shutdown().await?;
//! bob.shutdown().await?;
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::packet::{MessageType, Packet, MAX_PAYLOAD};
use crate::socket::UdpTransport;
use crate::sr_receiver::{Disposition, SrReceiver};
use crate::sr_sender::{AckOutcome, SrSender};
use crate::state::ConnectionState;
use crate::transport::{Transport, TransportError};

/// Pause before retrying after a transport receive error.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Errors surfaced by a protocol instance.
#[derive(Error, Debug)]
pub enum SrError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    /// Outstanding messages were still unacknowledged when the drain bound
    /// ran out.  Resources are released regardless.
    #[error("gave up waiting for ACKs after {waited:?} (base={base}, next_seq={next_seq})")]
    DrainTimeout {
        base: u32,
        next_seq: u32,
        waited: Duration,
    },
}

/// Application callback receiving each message exactly once, in order.
pub type MessageHandler = Box<dyn FnMut(Vec<u8>) + Send + 'static>;

/// Sender state plus lifecycle, guarded together so that a send can never
/// slip in after shutdown has started.
#[derive(Debug)]
struct Outbound {
    sender: SrSender,
    state: ConnectionState,
}

struct Shared<T> {
    transport: T,
    config: Config,
    outbound: Mutex<Outbound>,
    timer_wake: Notify,
}

impl<T> Shared<T> {
    fn lock_outbound(&self) -> MutexGuard<'_, Outbound> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One endpoint of a full-duplex Selective Repeat connection.
///
/// Must be created from within a tokio runtime: [`start`](Self::start)
/// spawns the receive and timer tasks.
pub struct SrConnection<T: Transport> {
    shared: Arc<Shared<T>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SrConnection<UdpTransport> {
    /// Bind a UDP socket at `local`, connect it to `peer` and start the
    /// protocol on top of it.
    pub async fn connect_udp<H>(
        local: SocketAddr,
        peer: SocketAddr,
        config: Config,
        handler: H,
    ) -> Result<Self, SrError>
    where
        H: FnMut(Vec<u8>) + Send + 'static,
    {
        config.validate()?;
        let transport = UdpTransport::bind(local, peer).await?;
        Self::start(transport, config, handler)
    }
}

impl<T: Transport> SrConnection<T> {
    /// Start the protocol over `transport`, delivering inbound messages to
    /// `handler` from the receive task.
    pub fn start<H>(transport: T, config: Config, handler: H) -> Result<Self, SrError>
    where
        H: FnMut(Vec<u8>) + Send + 'static,
    {
        config.validate()?;

        let shared = Arc::new(Shared {
            outbound: Mutex::new(Outbound {
                sender: SrSender::new(config.window_size, config.timeout),
                state: ConnectionState::Open,
            }),
            timer_wake: Notify::new(),
            transport,
            config,
        });

        let dispatcher = Dispatcher {
            receiver: SrReceiver::new(shared.config.window_size),
            handler: Box::new(handler),
            shared: Arc::clone(&shared),
        };

        let receive_task = tokio::spawn(receive_loop(dispatcher));
        let timer_task = tokio::spawn(timer_loop(Arc::clone(&shared)));

        log::info!(
            "[sr] started (window={}, timeout={:?})",
            shared.config.window_size,
            shared.config.timeout
        );

        Ok(Self {
            shared,
            tasks: Mutex::new(vec![receive_task, timer_task]),
        })
    }

    /// Start the protocol with inbound messages forwarded to a channel.
    pub fn start_with_channel(
        transport: T,
        config: Config,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Vec<u8>>), SrError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self::start(transport, config, move |msg| {
            let _ = tx.send(msg);
        })?;
        Ok((conn, rx))
    }

    /// Hand one message to the protocol.
    ///
    /// Returns `false` without side effects when the send window is full or
    /// the connection is shutting down; the caller should retry later.
    /// Messages longer than [`MAX_PAYLOAD`] can never fit a datagram and are
    /// always rejected.  Never blocks beyond the brief sender lock.
    pub fn send(&self, message: impl Into<Vec<u8>>) -> bool {
        let message = message.into();
        if message.len() > MAX_PAYLOAD {
            log::warn!(
                "[sr] send rejected: {} byte message exceeds {MAX_PAYLOAD} bytes",
                message.len()
            );
            return false;
        }

        let mut out = self.shared.lock_outbound();
        if !out.state.accepts_sends() {
            log::debug!("[sr] send rejected: connection {}", out.state);
            return false;
        }

        match out.sender.send(message, Instant::now()) {
            Ok(packet) => {
                self.shared.transport.send(&packet);
                log::debug!(
                    "[sr] → DATA seq={} len={} in_flight={}",
                    packet.seq,
                    packet.payload.len(),
                    out.sender.in_flight()
                );
                drop(out);
                self.shared.timer_wake.notify_one();
                true
            }
            Err(full) => {
                log::debug!("[sr] send rejected: {full}");
                false
            }
        }
    }

    /// Drain outstanding sends, then cancel every timer, stop the background
    /// tasks and release the transport.
    ///
    /// Waits (polling every `drain_poll`) until every assigned sequence number
    /// is acknowledged, for at most `drain_timeout`.  On timeout the
    /// connection is closed anyway and [`SrError::DrainTimeout`] is returned.
    /// Calling `shutdown` again after the first call is a no-op.
    pub async fn shutdown(&self) -> Result<(), SrError> {
        {
            let mut out = self.shared.lock_outbound();
            if out.state != ConnectionState::Open {
                return Ok(());
            }
            out.state = ConnectionState::Draining;
        }

        let started = Instant::now();
        let drained = loop {
            let (base, next_seq, pending) = {
                let out = self.shared.lock_outbound();
                (out.sender.base(), out.sender.next_seq(), out.sender.has_unacked())
            };
            if !pending {
                break Ok(());
            }
            let waited = started.elapsed();
            if waited >= self.shared.config.drain_timeout {
                log::warn!(
                    "[sr] drain timed out after {waited:?}: base={base} next_seq={next_seq}"
                );
                break Err(SrError::DrainTimeout {
                    base,
                    next_seq,
                    waited,
                });
            }
            log::debug!(
                "[sr] waiting for last ACK (seq={})",
                next_seq.wrapping_sub(1)
            );
            tokio::time::sleep(self.shared.config.drain_poll).await;
        };

        self.close();
        drained
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock_outbound().state
    }

    /// Oldest unacknowledged outbound sequence number.
    pub fn sender_base(&self) -> u32 {
        self.shared.lock_outbound().sender.base()
    }

    /// Sequence number the next accepted message will carry.
    pub fn next_seq(&self) -> u32 {
        self.shared.lock_outbound().sender.next_seq()
    }

    /// Messages sent but not yet slid past.
    pub fn in_flight(&self) -> usize {
        self.shared.lock_outbound().sender.in_flight()
    }

    /// Retransmission timers currently armed.
    pub fn live_timers(&self) -> usize {
        self.shared.lock_outbound().sender.live_timers()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    fn close(&self) {
        {
            let mut out = self.shared.lock_outbound();
            out.state = ConnectionState::Closed;
            out.sender.cancel_all_timers();
        }
        self.shared.timer_wake.notify_one();
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
        self.shared.transport.shutdown();
        log::info!("[sr] connection shut down");
    }
}

impl<T: Transport> Drop for SrConnection<T> {
    fn drop(&mut self) {
        if self.state() != ConnectionState::Closed {
            self.close();
        }
    }
}

// ---------------------------------------------------------------------------
// Receive path
// ---------------------------------------------------------------------------

/// Single arrival point for inbound packets.  Owns the receive window.
struct Dispatcher<T> {
    shared: Arc<Shared<T>>,
    receiver: SrReceiver,
    handler: MessageHandler,
}

impl<T: Transport> Dispatcher<T> {
    /// Wait for the next datagram and route it.
    async fn handle_arrival(&mut self) -> Result<(), TransportError> {
        let packet = self.shared.transport.recv().await?;
        self.dispatch(packet);
        Ok(())
    }

    /// Route by message type: ACK to the sender, DATA to the receiver.
    fn dispatch(&mut self, packet: Packet) {
        if packet.corrupt {
            log::debug!("[sr] ← corrupt datagram dropped; peer will time out");
            return;
        }
        match packet.kind {
            MessageType::Ack => self.on_ack(packet.seq),
            MessageType::Data => self.on_data(&packet),
        }
    }

    fn on_ack(&self, seq: u32) {
        let (outcome, base) = {
            let mut out = self.shared.lock_outbound();
            if out.state == ConnectionState::Closed {
                return;
            }
            let outcome = out.sender.on_ack(seq);
            (outcome, out.sender.base())
        };
        match outcome {
            AckOutcome::Acked { slid } => {
                log::debug!("[sr] ← ACK seq={seq} (slid {slid}, base={base})")
            }
            AckOutcome::Duplicate => log::trace!("[sr] ← duplicate ACK seq={seq}"),
            AckOutcome::Ignored => log::trace!("[sr] ← ACK seq={seq} outside window"),
        }
    }

    fn on_data(&mut self, packet: &Packet) {
        let outcome = self.receiver.on_data(packet);

        if let Some(seq) = outcome.ack {
            self.shared.transport.send(&Packet::ack(seq));
        }
        match outcome.disposition {
            Disposition::Accepted | Disposition::Duplicate => log::debug!(
                "[sr] ← DATA seq={} {:?}; → ACK (base={})",
                packet.seq,
                outcome.disposition,
                self.receiver.base()
            ),
            Disposition::Stale => {
                log::debug!("[sr] ← DATA seq={} already delivered; → ACK", packet.seq)
            }
            Disposition::Ahead => {
                log::trace!("[sr] ← DATA seq={} beyond window, ignored", packet.seq)
            }
            Disposition::Corrupt => {}
        }

        for message in outcome.delivered {
            (self.handler)(message);
        }
    }
}

async fn receive_loop<T: Transport>(mut dispatcher: Dispatcher<T>) {
    loop {
        match dispatcher.handle_arrival().await {
            Ok(()) => {}
            Err(TransportError::Closed) => break,
            Err(e) => {
                log::warn!("[sr] receive failed: {e}");
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
            }
        }
    }
    log::debug!("[sr] receive loop finished");
}

// ---------------------------------------------------------------------------
// Timer service
// ---------------------------------------------------------------------------

/// Retransmit every expired packet, then sleep until the next deadline or
/// until `send` arms a new timer.
async fn timer_loop<T: Transport>(shared: Arc<Shared<T>>) {
    loop {
        let next_deadline = {
            let mut out = shared.lock_outbound();
            if out.state == ConnectionState::Closed {
                break;
            }
            for packet in out.sender.poll_timeouts(Instant::now()) {
                log::debug!("[sr] timeout, retransmitting seq={}", packet.seq);
                shared.transport.send(&packet);
            }
            out.sender.next_deadline()
        };

        match next_deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shared.timer_wake.notified() => {}
                }
            }
            None => shared.timer_wake.notified().await,
        }
    }
    log::debug!("[sr] timer loop finished");
}
