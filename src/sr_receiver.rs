//! Selective Repeat receive-side state machine.
//!
//! [`SrReceiver`] implements the receiver side of Selective Repeat:
//!
//! - Any uncorrupted DATA packet inside `[base, base + N - 1]` is ACKed
//!   individually and buffered, even when it arrives out of order.
//! - As soon as the slot at `base` is filled, the contiguous run of buffered
//!   messages is handed to the application and the window slides past it.
//! - A packet in `[base - N, base - 1]` is re-ACKed (its earlier ACK may have
//!   been lost) but never delivered a second time.  A sender's window can lag
//!   the receiver's by at most `N`, so nothing older is ever legitimately in
//!   flight.
//! - Any other packet, or a corrupt one, is dropped without an ACK; the
//!   peer's retransmission timer recovers.
//!
//! This module only manages state; the caller transmits the returned ACK and
//! invokes the application handler with the returned messages.

use crate::packet::{MessageType, Packet};
use crate::window::SlotWindow;

/// One slot of the receive window.
#[derive(Debug, Default)]
pub struct ReceiverSlot {
    pub payload: Vec<u8>,
    pub received: bool,
}

/// How an inbound DATA packet was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Newly buffered inside the window.
    Accepted,
    /// Inside the window but already buffered.
    Duplicate,
    /// In `[base - N, base)`: already delivered, re-ACKed only.
    Stale,
    /// Beyond `base + N - 1` (and not in the span behind): dropped, no ACK.
    Ahead,
    /// Failed the integrity check (or was not DATA): dropped, no ACK.
    Corrupt,
}

/// Result of [`SrReceiver::on_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataOutcome {
    pub disposition: Disposition,
    /// Sequence number to acknowledge, if any.
    pub ack: Option<u32>,
    /// Messages now deliverable to the application, in sequence order.
    pub delivered: Vec<Vec<u8>>,
}

impl DataOutcome {
    fn dropped(disposition: Disposition) -> Self {
        Self {
            disposition,
            ack: None,
            delivered: Vec::new(),
        }
    }

    fn acked(disposition: Disposition, seq: u32) -> Self {
        Self {
            disposition,
            ack: Some(seq),
            delivered: Vec::new(),
        }
    }
}

/// Selective Repeat receive-side state for one connection.
#[derive(Debug)]
pub struct SrReceiver {
    window: SlotWindow<ReceiverSlot>,
}

impl SrReceiver {
    /// Create a receiver expecting sequence number 0 first.
    pub fn new(window_size: usize) -> Self {
        Self {
            window: SlotWindow::new(0, window_size),
        }
    }

    /// Oldest sequence number not yet delivered.
    pub fn base(&self) -> u32 {
        self.window.base()
    }

    pub fn window_size(&self) -> usize {
        self.window.size()
    }

    /// Number of out-of-order messages held back waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.window.iter().filter(|(_, s)| s.received).count()
    }

    /// Sequence numbers currently buffered, ascending.
    pub fn buffered_seqs(&self) -> Vec<u32> {
        self.window
            .iter()
            .filter(|(_, s)| s.received)
            .map(|(seq, _)| seq)
            .collect()
    }

    /// Process an inbound DATA packet.
    pub fn on_data(&mut self, packet: &Packet) -> DataOutcome {
        if packet.corrupt || packet.kind != MessageType::Data {
            return DataOutcome::dropped(Disposition::Corrupt);
        }
        let seq = packet.seq;

        if self.window.is_behind(seq) {
            return DataOutcome::acked(Disposition::Stale, seq);
        }

        let Some(slot) = self.window.slot_mut(seq) else {
            return DataOutcome::dropped(Disposition::Ahead);
        };

        let disposition = if slot.received {
            Disposition::Duplicate
        } else {
            slot.payload = packet.payload.clone();
            slot.received = true;
            Disposition::Accepted
        };

        let mut delivered = Vec::new();
        if seq == self.window.base() {
            self.window
                .slide_while(|s| s.received, |_, s| delivered.push(s.payload));
        }

        DataOutcome {
            disposition,
            ack: Some(seq),
            delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(seq: u32, payload: &[u8]) -> Packet {
        Packet::data(seq, payload.to_vec())
    }

    #[test]
    fn initial_state() {
        let r = SrReceiver::new(4);
        assert_eq!(r.base(), 0);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn in_order_packet_is_delivered_and_acked() {
        let mut r = SrReceiver::new(4);
        let out = r.on_data(&data(0, b"hello"));
        assert_eq!(out.disposition, Disposition::Accepted);
        assert_eq!(out.ack, Some(0));
        assert_eq!(out.delivered, vec![b"hello".to_vec()]);
        assert_eq!(r.base(), 1);
    }

    #[test]
    fn out_of_order_packets_are_buffered_until_gap_fills() {
        let mut r = SrReceiver::new(4);

        let out = r.on_data(&data(2, b"c"));
        assert_eq!(out.ack, Some(2));
        assert!(out.delivered.is_empty());

        let out = r.on_data(&data(1, b"b"));
        assert_eq!(out.ack, Some(1));
        assert!(out.delivered.is_empty());
        assert_eq!(r.buffered_seqs(), vec![1, 2]);

        let out = r.on_data(&data(0, b"a"));
        assert_eq!(out.ack, Some(0));
        assert_eq!(out.delivered, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(r.base(), 3);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn delivery_stops_at_first_gap() {
        let mut r = SrReceiver::new(5);
        r.on_data(&data(1, b"b"));
        r.on_data(&data(3, b"d"));
        let out = r.on_data(&data(0, b"a"));
        assert_eq!(out.delivered, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(r.base(), 2);
        assert_eq!(r.buffered_seqs(), vec![3]);
    }

    #[test]
    fn duplicate_in_window_is_reacked_once_more() {
        let mut r = SrReceiver::new(4);
        r.on_data(&data(2, b"c"));
        let out = r.on_data(&data(2, b"c"));
        assert_eq!(out.disposition, Disposition::Duplicate);
        assert_eq!(out.ack, Some(2));
        assert!(out.delivered.is_empty());
        assert_eq!(r.buffered(), 1);
    }

    #[test]
    fn delivered_packet_is_reacked_but_not_redelivered() {
        let mut r = SrReceiver::new(4);
        r.on_data(&data(0, b"a"));

        let out = r.on_data(&data(0, b"a"));
        assert_eq!(out.disposition, Disposition::Stale);
        assert_eq!(out.ack, Some(0));
        assert!(out.delivered.is_empty());
        assert_eq!(r.base(), 1);
    }

    #[test]
    fn packet_beyond_window_is_ignored() {
        let mut r = SrReceiver::new(4);
        let out = r.on_data(&data(4, b"e"));
        assert_eq!(out.disposition, Disposition::Ahead);
        assert_eq!(out.ack, None);
        assert_eq!(r.buffered(), 0);

        // The last in-window number is still accepted.
        assert_eq!(r.on_data(&data(3, b"d")).disposition, Disposition::Accepted);
    }

    #[test]
    fn far_sequence_numbers_are_ignored_not_reacked() {
        let mut r = SrReceiver::new(4);
        for seq in 0..6 {
            r.on_data(&data(seq, b"x"));
        }
        assert_eq!(r.base(), 6);

        // More than one window behind: a conforming sender never has it in flight.
        let out = r.on_data(&data(1, b"x"));
        assert_eq!(out.disposition, Disposition::Ahead);
        assert_eq!(out.ack, None);

        // Half the sequence space ahead wraps to "before base" numerically.
        let out = r.on_data(&data(6u32.wrapping_add(1 << 31).wrapping_add(3), b"x"));
        assert_eq!(out.disposition, Disposition::Ahead);
        assert_eq!(out.ack, None);

        // The last window length behind base is still re-ACKed.
        assert_eq!(r.on_data(&data(2, b"x")).ack, Some(2));
    }

    #[test]
    fn corrupt_packet_gets_no_ack() {
        let mut r = SrReceiver::new(4);
        let mut pkt = data(0, b"a");
        pkt.corrupt = true;
        let out = r.on_data(&pkt);
        assert_eq!(out.disposition, Disposition::Corrupt);
        assert_eq!(out.ack, None);
        assert_eq!(r.base(), 0);
    }

    #[test]
    fn buffered_seqs_stay_inside_window() {
        let mut r = SrReceiver::new(3);
        for seq in [5u32, 2, 1, 4, 0, 3, 2] {
            r.on_data(&data(seq, &[seq as u8]));
            let base = r.base();
            for s in r.buffered_seqs() {
                assert!(s >= base && s < base + r.window_size() as u32);
            }
        }
    }
}
