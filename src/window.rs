//! Fixed-length slot window shared by the sender and receiver.
//!
//! A [`SlotWindow`] holds exactly `size` slots covering the sequence numbers
//! `[base, base + size)`.  The slot for `seq` lives at relative index
//! `seq - base`.  Sliding drops the oldest slot, appends a fresh default slot
//! at the far edge and advances `base` by one, so the window length never
//! changes.
//!
//! ```text
//!   base                          base + size - 1
//!    │                                  │
//!  ──┼──┬──┬──┬──┬──┬──┬──┬──┬──┬──┬────┼──▶ seq space
//!    │0 │1 │2 │3 │  ...            │size-1│
//! ```
//!
//! Sequence numbers are u32 and wrap around; every comparison is done on the
//! wrapping distance from `base`.  Only two spans are meaningful: the window
//! itself and the `size` numbers just behind it.  Anything else is foreign.

use std::collections::VecDeque;

/// Wrapping distance from `base` forward to `seq`.
#[inline]
pub fn seq_distance(base: u32, seq: u32) -> u32 {
    seq.wrapping_sub(base)
}

/// Sliding array of `size` slots anchored at `base`.
#[derive(Debug)]
pub struct SlotWindow<S> {
    base: u32,
    slots: VecDeque<S>,
}

impl<S: Default> SlotWindow<S> {
    /// Create a window of `size` empty slots starting at sequence `base`.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero; [`crate::config::Config::validate`] rejects
    /// such configurations before a window is ever built.
    pub fn new(base: u32, size: usize) -> Self {
        assert!(size >= 1, "window size must be at least 1");
        Self {
            base,
            slots: (0..size).map(|_| S::default()).collect(),
        }
    }

    /// Oldest sequence number covered by the window.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Number of slots (the configured window size).
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Relative slot index for `seq`, or `None` when `seq` lies outside
    /// `[base, base + size)`.
    pub fn index_of(&self, seq: u32) -> Option<usize> {
        let distance = seq_distance(self.base, seq) as usize;
        (distance < self.slots.len()).then_some(distance)
    }

    /// `true` when `seq` falls inside the window.
    pub fn contains(&self, seq: u32) -> bool {
        self.index_of(seq).is_some()
    }

    /// `true` when `seq` lies in `[base - size, base)`: slid past within the
    /// last window length.  Older or far-ahead numbers are neither behind nor
    /// inside.
    pub fn is_behind(&self, seq: u32) -> bool {
        let back = seq_distance(seq, self.base) as usize;
        back != 0 && back <= self.slots.len()
    }

    pub fn slot(&self, seq: u32) -> Option<&S> {
        let i = self.index_of(seq)?;
        self.slots.get(i)
    }

    pub fn slot_mut(&mut self, seq: u32) -> Option<&mut S> {
        let i = self.index_of(seq)?;
        self.slots.get_mut(i)
    }

    /// Iterate `(seq, slot)` pairs from `base` upwards.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &S)> {
        let base = self.base;
        self.slots
            .iter()
            .enumerate()
            .map(move |(i, s)| (base.wrapping_add(i as u32), s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut S)> {
        let base = self.base;
        self.slots
            .iter_mut()
            .enumerate()
            .map(move |(i, s)| (base.wrapping_add(i as u32), s))
    }

    /// Slide the window forward while the slot at `base` satisfies `ready`.
    ///
    /// Each slid slot is handed to `on_slide` together with its sequence
    /// number, in ascending order.  Stops at the first slot that is not ready;
    /// since fresh slots are appended as the window moves, at most `size`
    /// slots can be slid in a single call.  Returns the number slid.
    pub fn slide_while<R, F>(&mut self, mut ready: R, mut on_slide: F) -> usize
    where
        R: FnMut(&S) -> bool,
        F: FnMut(u32, S),
    {
        let mut slid = 0;
        while slid < self.slots.len() {
            match self.slots.front() {
                Some(front) if ready(front) => {}
                _ => break,
            }
            let Some(slot) = self.slots.pop_front() else {
                break;
            };
            self.slots.push_back(S::default());
            on_slide(self.base, slot);
            self.base = self.base.wrapping_add(1);
            slid += 1;
        }
        slid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Flag(bool);

    #[test]
    fn index_of_covers_exactly_the_window() {
        let w: SlotWindow<Flag> = SlotWindow::new(10, 4);
        assert_eq!(w.index_of(9), None);
        assert_eq!(w.index_of(10), Some(0));
        assert_eq!(w.index_of(13), Some(3));
        assert_eq!(w.index_of(14), None);
    }

    #[test]
    fn behind_covers_one_window_length() {
        let w: SlotWindow<Flag> = SlotWindow::new(10, 4);
        assert!(w.is_behind(9));
        assert!(w.is_behind(6));
        assert!(!w.is_behind(5));
        assert!(!w.is_behind(0));
        assert!(!w.is_behind(10));
        assert!(!w.is_behind(20));
        // Half the sequence space ahead is not "behind".
        assert!(!w.is_behind(10u32.wrapping_add(1 << 31).wrapping_add(5)));
    }

    #[test]
    fn slide_stops_at_first_gap() {
        let mut w: SlotWindow<Flag> = SlotWindow::new(0, 4);
        w.slot_mut(0).unwrap().0 = true;
        w.slot_mut(1).unwrap().0 = true;
        w.slot_mut(3).unwrap().0 = true;

        let mut seen = Vec::new();
        let n = w.slide_while(|s| s.0, |seq, _| seen.push(seq));
        assert_eq!(n, 2);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(w.base(), 2);
        assert_eq!(w.size(), 4);
        // seq 3 kept its flag after the shift; the new far slot is fresh.
        assert!(w.slot(3).unwrap().0);
        assert!(!w.slot(5).unwrap().0);
    }

    #[test]
    fn slide_of_full_window_is_bounded() {
        let mut w: SlotWindow<Flag> = SlotWindow::new(0, 3);
        for (_, s) in w.iter_mut() {
            s.0 = true;
        }
        assert_eq!(w.slide_while(|s| s.0, |_, _| {}), 3);
        assert_eq!(w.base(), 3);
        assert!(w.iter().all(|(_, s)| !s.0));
    }

    #[test]
    fn window_wraps_sequence_space() {
        let mut w: SlotWindow<Flag> = SlotWindow::new(u32::MAX - 1, 4);
        assert_eq!(w.index_of(0), Some(2));
        assert!(w.is_behind(u32::MAX - 2));
        w.slot_mut(u32::MAX - 1).unwrap().0 = true;
        w.slot_mut(u32::MAX).unwrap().0 = true;
        w.slide_while(|s| s.0, |_, _| {});
        assert_eq!(w.base(), 0);
    }
}
