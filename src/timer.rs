//! Virtual-time timer queue.
//!
//! Deadlines live in the same time base as every `now` handed to the
//! protocol components. The queue never fires anything on its own; the
//! owner asks for the next deadline and pops expired entries.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::time::Duration;

/// Pending one-shot timers keyed by `K`, at most one per key.
#[derive(Debug)]
pub struct TimerQueue<K> {
    deadlines: HashMap<K, Duration>,
    order: BTreeSet<(Duration, K)>,
}

impl<K: Copy + Ord + Hash> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            deadlines: HashMap::new(),
            order: BTreeSet::new(),
        }
    }

    /// Arm the timer for `key`, replacing any pending deadline.
    pub fn schedule(&mut self, key: K, deadline: Duration) {
        self.cancel(key);
        self.deadlines.insert(key, deadline);
        self.order.insert((deadline, key));
    }

    /// Cancel the timer for `key`. Returns false if none was pending.
    pub fn cancel(&mut self, key: K) -> bool {
        match self.deadlines.remove(&key) {
            Some(deadline) => {
                self.order.remove(&(deadline, key));
                true
            }
            None => false,
        }
    }

    /// Cancel everything.
    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.order.clear();
    }

    pub fn is_pending(&self, key: K) -> bool {
        self.deadlines.contains_key(&key)
    }

    pub fn deadline(&self, key: K) -> Option<Duration> {
        self.deadlines.get(&key).copied()
    }

    /// Time left before `key` fires, zero once it is due.
    pub fn delay_left(&self, key: K, now: Duration) -> Option<Duration> {
        self.deadline(key)
            .map(|deadline| deadline.saturating_sub(now))
    }

    /// Earliest pending deadline and its key.
    pub fn next(&self) -> Option<(Duration, K)> {
        self.order.first().copied()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.next().map(|(deadline, _)| deadline)
    }

    /// Remove and return the earliest timer if it is due at `now`.
    pub fn pop_expired(&mut self, now: Duration) -> Option<(Duration, K)> {
        let (deadline, key) = self.next()?;
        if deadline > now {
            return None;
        }
        self.cancel(key);
        Some((deadline, key))
    }

    /// Pending keys in ascending key order.
    pub fn keys_sorted(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.deadlines.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

impl<K: Copy + Ord + Hash> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
