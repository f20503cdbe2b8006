//! Retransmission timer management.
//!
//! Selective Repeat keeps one retransmission timer per in-flight packet.
//! Rather than one OS timer per slot, all deadlines live in a single
//! [`TimerWheel`]: a min-heap of `(deadline, handle, seq)` entries serviced by
//! one coordinating task (see [`crate::sr_connection`]).
//!
//! - [`TimerWheel::arm`] schedules a deadline and returns a [`TimerHandle`].
//! - [`TimerWheel::cancel`] invalidates a handle.  Cancelled entries stay in
//!   the heap and are discarded lazily when they reach the top.
//! - [`TimerWheel::pop_expired`] yields every live timer whose deadline has
//!   passed; popping consumes the handle.
//!
//! The wheel uses `tokio::time::Instant` so paused-clock tests drive it
//! deterministically.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use tokio::time::Instant;

/// Token identifying one armed timer.  Cancellation is removal by token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Min-heap of retransmission deadlines with lazy cancellation.
#[derive(Debug, Default)]
pub struct TimerWheel {
    heap: BinaryHeap<Reverse<(Instant, TimerHandle, u32)>>,
    live: HashSet<TimerHandle>,
    next_id: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer for `seq` firing at `deadline`.
    pub fn arm(&mut self, seq: u32, deadline: Instant) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.heap.push(Reverse((deadline, handle, seq)));
        self.live.insert(handle);
        handle
    }

    /// Cancel a pending timer.  Returns `false` if it already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.live.remove(&handle)
    }

    pub fn is_live(&self, handle: TimerHandle) -> bool {
        self.live.contains(&handle)
    }

    /// Number of timers that are armed and not yet fired or cancelled.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Earliest deadline among live timers.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.prune();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Remove and return every live timer with `deadline <= now`, earliest
    /// first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(TimerHandle, u32)> {
        let mut expired = Vec::new();
        loop {
            self.prune();
            match self.heap.peek() {
                Some(Reverse((deadline, _, _))) if *deadline <= now => {}
                _ => break,
            }
            if let Some(Reverse((_, handle, seq))) = self.heap.pop() {
                self.live.remove(&handle);
                expired.push((handle, seq));
            }
        }
        expired
    }

    /// Cancel every timer.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    // Drop cancelled entries sitting at the top of the heap.
    fn prune(&mut self) {
        while let Some(Reverse((_, handle, _))) = self.heap.peek() {
            if self.live.contains(handle) {
                break;
            }
            self.heap.pop();
        }
    }
}
