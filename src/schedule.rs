//! Deadline ordered transmit schedule
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::Vec;

use crate::Time;

/// Schedule entry referencing a pool slot
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Entry {
    pub slot: u8,
    pub deadline: Time,
}

/// Transmit schedule for up to `N` buffers, ordered by ascending deadline.
///
/// Entries with equal deadlines keep their submission order.
#[derive(Clone, Debug)]
pub struct Schedule<const N: usize> {
    entries: Vec<Entry, N>,
}

impl <const N: usize> Schedule<N> {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, slot: u8) -> bool {
        self.entries.iter().any(|e| e.slot == slot)
    }

    pub fn iter(&self) -> impl Iterator<Item=&Entry> {
        self.entries.iter()
    }

    /// Earliest entry without removing it
    pub fn peek(&self) -> Option<&Entry> {
        self.entries.get(0)
    }

    /// Insert an entry keeping deadline order, returning it if the schedule is full
    pub fn insert(&mut self, entry: Entry) -> Result<(), Entry> {
        self.entries.push(entry)?;

        // Bubble the new tail down past any later deadlines
        let e = &mut self.entries[..];
        let mut i = e.len() - 1;
        while i > 0 && e[i - 1].deadline > e[i].deadline {
            e.swap(i - 1, i);
            i -= 1;
        }

        Ok(())
    }

    /// Remove the entry for a slot, returning whether it was scheduled
    pub fn remove(&mut self, slot: u8) -> bool {
        let index = match self.entries.iter().position(|e| e.slot == slot) {
            Some(i) => i,
            None => return false,
        };

        self.entries[index..].rotate_left(1);
        self.entries.pop();

        true
    }

    /// Remove and return the earliest entry
    pub fn pop_head(&mut self) -> Option<Entry> {
        match self.entries.len() {
            0 => None,
            _ => {
                let head = self.entries[0];
                self.remove(head.slot);
                Some(head)
            }
        }
    }

    /// Pop the earliest entry whose deadline is still ahead of `now`.
    ///
    /// Entries whose deadline has elapsed (`deadline <= now`) are removed on
    /// the way and handed to `on_expired`, they are never returned as due.
    pub fn pop_due(&mut self, now: Time, mut on_expired: impl FnMut(Entry)) -> Option<Entry> {
        while let Some(e) = self.pop_head() {
            if e.deadline > now {
                return Some(e);
            }
            on_expired(e);
        }
        None
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec as StdVec;

    use super::*;

    fn entry(slot: u8, deadline: Time) -> Entry {
        Entry { slot, deadline }
    }

    #[test]
    fn insert_orders_by_deadline() {
        let mut s = Schedule::<8>::new();

        // Pseudo-random deadlines, ties included
        let deadlines = [50, 10, 70, 10, 30, 90, 30, 20];
        for (i, d) in deadlines.iter().enumerate() {
            s.insert(entry(i as u8, *d)).unwrap();
        }

        let order: StdVec<_> = s.iter().map(|e| e.deadline).collect();
        assert_eq!(order, std::vec![10, 10, 20, 30, 30, 50, 70, 90]);

        // Ties keep submission order
        let slots: StdVec<_> = s.iter().filter(|e| e.deadline == 10).map(|e| e.slot).collect();
        assert_eq!(slots, std::vec![1, 3]);

        assert_eq!(s.insert(entry(9, 1)), Err(entry(9, 1)));
    }

    #[test]
    fn remove_keeps_order() {
        let mut s = Schedule::<4>::new();
        s.insert(entry(0, 40)).unwrap();
        s.insert(entry(1, 10)).unwrap();
        s.insert(entry(2, 30)).unwrap();

        assert!(s.remove(2));
        assert!(!s.remove(2));
        assert!(!s.contains(2));

        assert_eq!(s.pop_head(), Some(entry(1, 10)));
        assert_eq!(s.pop_head(), Some(entry(0, 40)));
        assert_eq!(s.pop_head(), None);
        assert!(s.is_empty());
    }

    #[test]
    fn pop_due_discards_expired() {
        let mut s = Schedule::<4>::new();
        s.insert(entry(0, 100)).unwrap();
        s.insert(entry(1, 150)).unwrap();
        s.insert(entry(2, 200)).unwrap();

        let mut expired = StdVec::new();
        let due = s.pop_due(150, |e| expired.push(e.slot));

        // Deadline equal to now counts as elapsed
        assert_eq!(due, Some(entry(2, 200)));
        assert_eq!(expired, std::vec![0, 1]);
        assert!(s.is_empty());

        s.insert(entry(3, 10)).unwrap();
        assert_eq!(s.pop_due(1000, |_| ()), None);
    }

    #[test]
    fn pop_due_yields_non_decreasing_deadlines() {
        let mut s = Schedule::<16>::new();

        let mut seed = 0x1234u32;
        for i in 0..16 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            s.insert(entry(i, 1 + (seed >> 16) as Time % 500)).unwrap();
        }

        let mut last = 0;
        while let Some(e) = s.pop_due(0, |_| panic!("nothing has expired")) {
            assert!(e.deadline >= last);
            last = e.deadline;
        }
    }
}
