// Copyright 2025-2026 CEMAXECUTER LLC

/// Fixed-capacity FIFO of fixed-size byte slots.
///
/// One slot is one complete hardware transfer. All storage is allocated in
/// `new`; push and pop are a single `slot_size` copy. Not synchronized: the
/// transmit sink wraps it in its own mutex.
#[derive(Debug)]
pub struct SlotRing {
    store: Box<[i8]>,
    slot_size: usize,
    capacity: usize,
    /// Next slot to write
    head: usize,
    /// Next slot to read
    tail: usize,
    len: usize,
}

impl SlotRing {
    /// # Panics
    ///
    /// If `capacity` or `slot_size` is zero.
    pub fn new(capacity: usize, slot_size: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        assert!(slot_size > 0, "slot size must be non-zero");

        Self {
            store: vec![0i8; capacity * slot_size].into_boxed_slice(),
            slot_size,
            capacity,
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Copy one slot in at the write cursor. Returns false, leaving the ring
    /// untouched, when it is full.
    ///
    /// # Panics
    ///
    /// If `slot.len() != slot_size`.
    pub fn try_push(&mut self, slot: &[i8]) -> bool {
        if !self.has_room() {
            return false;
        }

        let start = self.head * self.slot_size;
        self.store[start..start + self.slot_size].copy_from_slice(slot);
        self.head = (self.head + 1) % self.capacity;
        self.len += 1;
        true
    }

    /// Copy the oldest slot into `dest`. Returns false, leaving the ring
    /// untouched, when it is empty.
    ///
    /// # Panics
    ///
    /// If `dest.len() != slot_size`.
    pub fn try_pop(&mut self, dest: &mut [i8]) -> bool {
        if self.is_empty() {
            return false;
        }

        let start = self.tail * self.slot_size;
        dest.copy_from_slice(&self.store[start..start + self.slot_size]);
        self.tail = (self.tail + 1) % self.capacity;
        self.len -= 1;
        true
    }

    /// Drop every queued slot.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    #[inline]
    pub fn has_room(&self) -> bool {
        self.len < self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of queued slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::VecDeque;

    fn slot(tag: i8, size: usize) -> Vec<i8> {
        (0..size).map(|i| tag.wrapping_add(i as i8)).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut ring = SlotRing::new(3, 4);
        for tag in [10, 20, 30] {
            assert!(ring.try_push(&slot(tag, 4)));
        }

        let mut out = [0i8; 4];
        for tag in [10, 20, 30] {
            assert!(ring.try_pop(&mut out));
            assert_eq!(out.to_vec(), slot(tag, 4));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_push_leaves_state_unchanged() {
        let mut ring = SlotRing::new(2, 4);
        assert!(ring.try_push(&slot(1, 4)));
        assert!(ring.try_push(&slot(2, 4)));
        assert!(!ring.has_room());

        assert!(!ring.try_push(&slot(99, 4)));
        assert_eq!(ring.len(), 2);

        // Rejected slot must not have overwritten anything
        let mut out = [0i8; 4];
        assert!(ring.try_pop(&mut out));
        assert_eq!(out.to_vec(), slot(1, 4));
        assert!(ring.try_pop(&mut out));
        assert_eq!(out.to_vec(), slot(2, 4));
    }

    #[test]
    fn test_empty_pop_leaves_dest_unchanged() {
        let mut ring = SlotRing::new(2, 4);
        let mut out = [7i8; 4];
        assert!(!ring.try_pop(&mut out));
        assert_eq!(out, [7; 4]);
        assert_eq!(ring.len(), 0);
        assert!(ring.is_empty());
        assert!(ring.has_room());
    }

    #[test]
    fn test_wraparound() {
        let mut ring = SlotRing::new(4, 2);
        let mut out = [0i8; 2];

        for round in 0..10i8 {
            for i in 0..3 {
                assert!(ring.try_push(&slot(round * 10 + i, 2)));
            }
            for i in 0..3 {
                assert!(ring.try_pop(&mut out));
                assert_eq!(out.to_vec(), slot(round * 10 + i, 2));
            }
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_random_ops_match_model() {
        let mut rng = StdRng::seed_from_u64(15);
        let mut ring = SlotRing::new(5, 3);
        let mut model: VecDeque<Vec<i8>> = VecDeque::new();
        let mut out = [0i8; 3];

        for step in 0..5000 {
            if rng.gen_bool(0.5) {
                let s = slot(rng.gen(), 3);
                let pushed = ring.try_push(&s);
                assert_eq!(pushed, model.len() < 5, "step {}", step);
                if pushed {
                    model.push_back(s);
                }
            } else {
                let popped = ring.try_pop(&mut out);
                assert_eq!(popped, !model.is_empty(), "step {}", step);
                if popped {
                    assert_eq!(Some(out.to_vec()), model.pop_front(), "step {}", step);
                }
            }

            assert!(ring.len() <= ring.capacity());
            assert_eq!(ring.len(), model.len());
            assert_eq!(ring.is_empty(), model.is_empty());
            assert_eq!(ring.has_room(), model.len() < 5);
        }
    }

    #[test]
    fn test_clear() {
        let mut ring = SlotRing::new(2, 2);
        ring.try_push(&[1, 2]);
        ring.try_push(&[3, 4]);
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.has_room());
        let mut out = [0i8; 2];
        assert!(!ring.try_pop(&mut out));
    }

    #[test]
    #[should_panic(expected = "capacity must be non-zero")]
    fn test_zero_capacity_rejected() {
        SlotRing::new(0, 8);
    }
}
