//! Selective Repeat send-side state machine.
//!
//! [`SrSender`] maintains a sliding window of up to `N` in-flight messages,
//! each with its own retransmission timer.
//!
//! # Protocol contract
//!
//! - A message is accepted only while `next_seq < base + N`; otherwise the
//!   caller gets [`WindowFull`] back and retries later.  Nothing is queued.
//! - ACKs are **individual**: `ACK(k)` acknowledges exactly sequence number
//!   `k`.  The window slides over the contiguous acknowledged prefix starting
//!   at `base`.
//! - On timeout only the packet whose timer fired is retransmitted, and its
//!   timer is re-armed with the same interval.  There is no back-off and no
//!   retry cap.
//! - A timer that fires for a sequence number no longer in `[base, next_seq)`,
//!   or already acknowledged, is dropped.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.  Methods that produce something to transmit return the
//! [`Packet`] instead of sending it, so the caller can transmit while still
//! holding whatever lock guards the sender.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::packet::Packet;
use crate::timer::{TimerHandle, TimerWheel};
use crate::window::{seq_distance, SlotWindow};

/// Returned by [`SrSender::send`] when `next_seq` has reached `base + N`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("send window full (base={base}, next_seq={next_seq})")]
pub struct WindowFull {
    pub base: u32,
    pub next_seq: u32,
}

/// What an inbound ACK did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Sequence number outside `[base, next_seq)`; nothing changed.
    Ignored,
    /// The slot was already acknowledged.
    Duplicate,
    /// The slot was newly acknowledged and the window slid by `slid`.
    Acked { slid: usize },
}

/// One slot of the retransmit window.
#[derive(Debug, Default)]
pub struct SenderSlot {
    /// Buffered packet, `None` for a slot not yet assigned.
    pub packet: Option<Packet>,
    pub acknowledged: bool,
    /// Live retransmission timer, if any.
    pub timer: Option<TimerHandle>,
    /// Total number of times the packet has been transmitted.
    pub tx_count: u32,
}

/// Selective Repeat send-side state for one connection.
///
/// # Sequence-number layout
///
/// ```text
///  base            next_seq         base + N
///    │                 │                │
///  ──┼─────────────────┼────────────────┼──▶ seq space
///    │ <── in flight ─▶│ <── usable ──▶ │
/// ```
#[derive(Debug)]
pub struct SrSender {
    window: SlotWindow<SenderSlot>,
    next_seq: u32,
    timers: TimerWheel,
    timeout: Duration,
}

impl SrSender {
    /// Create a sender starting at sequence number 0.
    ///
    /// `window_size` is N (≥ 1); `timeout` is the fixed retransmission
    /// interval.
    pub fn new(window_size: usize, timeout: Duration) -> Self {
        Self {
            window: SlotWindow::new(0, window_size),
            next_seq: 0,
            timers: TimerWheel::new(),
            timeout,
        }
    }

    /// Oldest unacknowledged sequence number.
    pub fn base(&self) -> u32 {
        self.window.base()
    }

    /// Sequence number the next accepted message will carry.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn window_size(&self) -> usize {
        self.window.size()
    }

    /// Number of assigned but not yet slid-past sequence numbers.
    pub fn in_flight(&self) -> usize {
        seq_distance(self.window.base(), self.next_seq) as usize
    }

    /// `true` when another message would be accepted.
    pub fn can_send(&self) -> bool {
        self.in_flight() < self.window.size()
    }

    /// `true` while any sent message awaits acknowledgement.
    pub fn has_unacked(&self) -> bool {
        self.in_flight() > 0
    }

    /// Number of retransmission timers currently armed.
    pub fn live_timers(&self) -> usize {
        self.timers.live_count()
    }

    pub fn slot(&self, seq: u32) -> Option<&SenderSlot> {
        self.window.slot(seq)
    }

    /// Earliest retransmission deadline, if any timer is armed.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Assign the next sequence number to `payload`, buffer the packet and
    /// arm its retransmission timer.
    ///
    /// Returns the packet the caller must transmit.
    pub fn send(&mut self, payload: Vec<u8>, now: Instant) -> Result<Packet, WindowFull> {
        if !self.can_send() {
            return Err(WindowFull {
                base: self.base(),
                next_seq: self.next_seq,
            });
        }

        let seq = self.next_seq;
        let packet = Packet::data(seq, payload);
        let handle = self.timers.arm(seq, now + self.timeout);

        let Some(slot) = self.window.slot_mut(seq) else {
            // can_send() guarantees next_seq is inside the window.
            self.timers.cancel(handle);
            return Err(WindowFull {
                base: self.window.base(),
                next_seq: seq,
            });
        };
        *slot = SenderSlot {
            packet: Some(packet.clone()),
            acknowledged: false,
            timer: Some(handle),
            tx_count: 1,
        };

        self.next_seq = self.next_seq.wrapping_add(1);
        debug_assert!(self.in_flight() <= self.window.size());
        Ok(packet)
    }

    /// Process an individual ACK for `seq`.
    ///
    /// Marks the slot acknowledged, cancels its timer and slides the window
    /// over every contiguous acknowledged slot at `base`.
    pub fn on_ack(&mut self, seq: u32) -> AckOutcome {
        if !self.is_outstanding(seq) {
            return AckOutcome::Ignored;
        }
        let Some(slot) = self.window.slot_mut(seq) else {
            return AckOutcome::Ignored;
        };
        if slot.acknowledged {
            return AckOutcome::Duplicate;
        }
        slot.acknowledged = true;
        if let Some(handle) = slot.timer.take() {
            self.timers.cancel(handle);
        }

        let timers = &mut self.timers;
        let slid = self.window.slide_while(
            |s| s.acknowledged,
            |_, s| {
                if let Some(handle) = s.timer {
                    timers.cancel(handle);
                }
            },
        );
        AckOutcome::Acked { slid }
    }

    /// Handle the retransmission timer for `seq` firing.
    ///
    /// Returns the packet to retransmit, or `None` when the callback is stale
    /// (`seq` already slid past, acknowledged, or never assigned).
    pub fn on_timeout(&mut self, seq: u32, now: Instant) -> Option<Packet> {
        if !self.is_outstanding(seq) {
            return None;
        }
        let deadline = now + self.timeout;
        let slot = self.window.slot_mut(seq)?;
        if slot.acknowledged {
            return None;
        }
        let packet = slot.packet.clone()?;

        // Cancel-then-rearm: never two live timers for one slot.
        if let Some(old) = slot.timer.take() {
            self.timers.cancel(old);
        }
        slot.timer = Some(self.timers.arm(seq, deadline));
        slot.tx_count += 1;
        Some(packet)
    }

    /// Pop every expired timer and return the packets to retransmit, oldest
    /// deadline first.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<Packet> {
        let expired = self.timers.pop_expired(now);
        let mut resend = Vec::with_capacity(expired.len());
        for (handle, seq) in expired {
            // Only the handle currently owned by the slot may retransmit.
            let current = self.window.slot(seq).and_then(|s| s.timer);
            if current != Some(handle) {
                continue;
            }
            if let Some(packet) = self.on_timeout(seq, now) {
                resend.push(packet);
            }
        }
        resend
    }

    /// Cancel every live timer.  Buffered packets are kept.
    pub fn cancel_all_timers(&mut self) {
        self.timers.clear();
        for (_, slot) in self.window.iter_mut() {
            slot.timer = None;
        }
    }

    // `seq` lies in `[base, next_seq)`.
    fn is_outstanding(&self, seq: u32) -> bool {
        seq_distance(self.window.base(), seq) < seq_distance(self.window.base(), self.next_seq)
    }
}
