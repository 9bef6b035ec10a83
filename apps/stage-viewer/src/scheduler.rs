//! Deadline queue for the single-threaded runtime.
//!
//! Entries remember the generation they were scheduled under. Bumping the
//! generation with [`Scheduler::cancel_all`] turns every outstanding entry
//! stale; stale entries are dropped when they reach the top of the heap and
//! never fire.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::time::Instant;

struct Entry<A> {
    due: Instant,
    seq: u64,
    generation: u64,
    action: A,
}

impl<A> PartialEq for Entry<A> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<A> Eq for Entry<A> {}

impl<A> PartialOrd for Entry<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for Entry<A> {
    // BinaryHeap is a max-heap; invert so the earliest deadline is on top and
    // equal deadlines fire in scheduling order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct Scheduler<A> {
    heap: BinaryHeap<Entry<A>>,
    next_seq: u64,
    generation: u64,
}

impl<A> Default for Scheduler<A> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            generation: 0,
        }
    }
}

impl<A> Scheduler<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn schedule_at(&mut self, due: Instant, action: A) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            due,
            seq,
            generation: self.generation,
            action,
        });
    }

    pub fn schedule_in(&mut self, now: Instant, delay: Duration, action: A) {
        self.schedule_at(now + delay, action);
    }

    /// Invalidates everything scheduled so far and returns the new generation.
    pub fn cancel_all(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn prune(&mut self) {
        while self
            .heap
            .peek()
            .is_some_and(|entry| entry.generation != self.generation)
        {
            self.heap.pop();
        }
    }

    /// Removes and returns the earliest live action due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<A> {
        self.prune();
        if self.heap.peek()?.due > now {
            return None;
        }
        self.heap.pop().map(|entry| entry.action)
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.prune();
        self.heap.peek().map(|entry| entry.due)
    }

    /// Live entries still waiting to fire.
    pub fn pending(&self) -> usize {
        self.heap
            .iter()
            .filter(|entry| entry.generation == self.generation)
            .count()
    }
}
