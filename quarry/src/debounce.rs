//! Per-key debounce timers driven by an externally supplied clock.

use std::hash::Hash;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

/// Tracks a quiet-period deadline per key. Rescheduling a key only restarts
/// that key's timer.
#[derive(Debug, Clone)]
pub struct Debouncer<K> {
    delay: Duration,
    deadlines: IndexMap<K, Instant>,
}

impl<K: Clone + Eq + Hash> Debouncer<K> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadlines: IndexMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)start the timer for the given key.
    pub fn schedule(&mut self, key: K, now: Instant) {
        self.deadlines.insert(key, now + self.delay);
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.shift_remove(key).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    /// The earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every pending key, due or not, in scheduling order.
    pub fn take_all(&mut self) -> Vec<K> {
        self.deadlines.drain(..).map(|(k, _)| k).collect()
    }

    /// Remove and return every key whose deadline has passed, in scheduling
    /// order.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let due = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(k, _)| k.clone())
            .collect::<Vec<K>>();
        for k in &due {
            self.deadlines.shift_remove(k);
        }
        due
    }
}
