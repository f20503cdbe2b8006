//! Scripted wire scenarios.
//!
//! Each endpoint runs over a [`SimTransport::tap`], so the test plays the
//! network: it sees every datagram an endpoint transmits and decides what
//! gets delivered, dropped or replayed.  The tokio clock is paused, so
//! "waiting for a timeout" costs no wall time.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;

use sr_over_udp::simulator::{SimTransport, Tap};
use sr_over_udp::{Config, MessageType, Packet, SrConnection};

const TIMEOUT: Duration = Duration::from_millis(150);

struct Endpoint {
    conn: SrConnection<SimTransport>,
    wire: Tap,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
}

fn endpoint(window: usize) -> Endpoint {
    let (transport, wire) = SimTransport::tap();
    let config = Config::default()
        .with_window_size(window)
        .with_timeout(TIMEOUT);
    let (conn, inbox) = SrConnection::start_with_channel(transport, config).unwrap();
    Endpoint { conn, wire, inbox }
}

/// Give the background tasks a chance to drain their queues.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn received(inbox: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Ok(msg) = inbox.try_recv() {
        out.push(msg);
    }
    out
}

// ---------------------------------------------------------------------------
// Lost ACK: retransmit, re-ACK without re-delivery, slide on the second ACK
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_lost_ack_is_recovered_by_retransmission() {
    let mut alice = endpoint(4);
    let mut bob = endpoint(4);

    assert!(alice.conn.send(b"m0".to_vec()));
    let data = alice.wire.next_sent().await.unwrap();
    assert_eq!(data, Packet::data(0, b"m0".to_vec()));

    bob.wire.deliver(data);
    let first_ack = bob.wire.next_sent().await.unwrap();
    assert_eq!(first_ack, Packet::ack(0));
    assert_eq!(bob.inbox.recv().await.unwrap(), b"m0");
    // first_ack is lost on the way back.

    let retransmit = alice.wire.next_sent().await.unwrap();
    assert_eq!(retransmit, Packet::data(0, b"m0".to_vec()));
    assert_eq!(alice.conn.sender_base(), 0);

    bob.wire.deliver(retransmit);
    let second_ack = bob.wire.next_sent().await.unwrap();
    assert_eq!(second_ack, Packet::ack(0));
    settle().await;
    assert!(received(&mut bob.inbox).is_empty(), "re-delivered after retransmit");

    alice.wire.deliver(second_ack);
    settle().await;
    assert_eq!(alice.conn.sender_base(), 1);
    assert_eq!(alice.conn.live_timers(), 0);
}

// ---------------------------------------------------------------------------
// Re-delivering old DATA yields exactly one ACK and no delivery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_replayed_data_is_reacked_once() {
    let mut bob = endpoint(4);

    for seq in 0..3 {
        bob.wire.deliver(Packet::data(seq, vec![seq as u8]));
    }
    settle().await;
    assert_eq!(received(&mut bob.inbox), vec![vec![0], vec![1], vec![2]]);
    bob.wire.drain_sent();

    bob.wire.deliver(Packet::data(1, vec![1]));
    settle().await;
    assert_eq!(bob.wire.drain_sent(), vec![Packet::ack(1)]);
    assert!(received(&mut bob.inbox).is_empty());
}

// ---------------------------------------------------------------------------
// Out-of-order arrival is buffered until the gap fills
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_out_of_order_data_waits_for_the_gap() {
    let mut bob = endpoint(4);

    bob.wire.deliver(Packet::data(2, b"two".to_vec()));
    bob.wire.deliver(Packet::data(1, b"one".to_vec()));
    settle().await;
    assert_eq!(bob.wire.drain_sent(), vec![Packet::ack(2), Packet::ack(1)]);
    assert!(received(&mut bob.inbox).is_empty());

    bob.wire.deliver(Packet::data(0, b"zero".to_vec()));
    settle().await;
    assert_eq!(bob.wire.drain_sent(), vec![Packet::ack(0)]);
    assert_eq!(
        received(&mut bob.inbox),
        vec![b"zero".to_vec(), b"one".to_vec(), b"two".to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_data_beyond_window_is_not_acked() {
    let mut bob = endpoint(4);

    bob.wire.deliver(Packet::data(4, b"too far".to_vec()));
    settle().await;
    assert!(bob.wire.drain_sent().is_empty());
    assert!(received(&mut bob.inbox).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_data_is_dropped_silently() {
    let mut bob = endpoint(4);

    let mut damaged = Packet::data(0, b"noise".to_vec());
    damaged.corrupt = true;
    bob.wire.deliver(damaged);
    bob.wire.deliver(Packet::garbled());
    settle().await;
    assert!(bob.wire.drain_sent().is_empty());
    assert!(received(&mut bob.inbox).is_empty());
}

// ---------------------------------------------------------------------------
// Timers: one per slot, and only unacknowledged slots retransmit
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_each_slot_keeps_a_single_timer() {
    let mut alice = endpoint(3);
    for i in 0..3u8 {
        assert!(alice.conn.send(vec![i]));
    }

    for _ in 0..6 {
        tokio::time::sleep(TIMEOUT).await;
        assert_eq!(alice.conn.live_timers(), 3);
    }

    let mut per_seq: HashMap<u32, usize> = HashMap::new();
    for packet in alice.wire.drain_sent() {
        assert_eq!(packet.kind, MessageType::Data);
        *per_seq.entry(packet.seq).or_default() += 1;
    }
    let counts: Vec<usize> = (0..3).map(|seq| per_seq[&seq]).collect();
    assert!(counts[0] >= 2, "no retransmissions: {counts:?}");
    assert!(counts.iter().all(|&c| c == counts[0]), "uneven timers: {counts:?}");
    assert!(counts[0] <= 7, "duplicate timers: {counts:?}");
}

#[tokio::test(start_paused = true)]
async fn test_selective_ack_stops_only_that_retransmission() {
    let mut alice = endpoint(4);
    for i in 0..3u8 {
        assert!(alice.conn.send(vec![i]));
    }
    settle().await;
    alice.wire.drain_sent();

    alice.wire.deliver(Packet::ack(1));
    settle().await;
    assert_eq!(alice.conn.sender_base(), 0);
    assert_eq!(alice.conn.live_timers(), 2);

    tokio::time::sleep(TIMEOUT).await;
    let resent: Vec<u32> = alice.wire.drain_sent().iter().map(|p| p.seq).collect();
    assert_eq!(resent, vec![0, 2]);

    alice.wire.deliver(Packet::ack(0));
    settle().await;
    assert_eq!(alice.conn.sender_base(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_ack_outside_window_is_ignored() {
    let mut alice = endpoint(4);
    assert!(alice.conn.send(b"only".to_vec()));
    settle().await;
    alice.wire.drain_sent();

    alice.wire.deliver(Packet::ack(3));
    alice.wire.deliver(Packet::ack(u32::MAX));
    settle().await;
    assert_eq!(alice.conn.sender_base(), 0);
    assert_eq!(alice.conn.live_timers(), 1);

    // The bogus ACK for seq 3 must not pre-acknowledge it.
    for i in 1..4u8 {
        assert!(alice.conn.send(vec![i]));
    }
    alice.wire.deliver(Packet::ack(0));
    settle().await;
    assert_eq!(alice.conn.sender_base(), 1);
    assert_eq!(alice.conn.in_flight(), 3);
}
