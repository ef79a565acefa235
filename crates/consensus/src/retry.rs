//! Bounded retry buffer
//!
//! Work that cannot run yet (a vote that arrived ahead of its entry) waits
//! here and is retried once per round, at most `max_attempts` rounds. The
//! buffer never holds more than its capacity: pushing into a full buffer
//! evicts the oldest item.

use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Rounds an item survives before it is dropped
    pub max_attempts: u32,
    /// Gap between rounds
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(5),
        }
    }
}

/// Outcome of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    /// Worth trying again next round
    Retry,
}

#[derive(Debug)]
struct Waiting<K, V> {
    key: K,
    value: V,
    attempts: u32,
}

/// FIFO of deferred work, unique by key
#[derive(Debug)]
pub struct RetryBuffer<K, V> {
    policy: RetryPolicy,
    capacity: usize,
    items: VecDeque<Waiting<K, V>>,
}

impl<K: PartialEq, V> RetryBuffer<K, V> {
    pub fn new(policy: RetryPolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity,
            items: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.items.iter().any(|item| &item.key == key)
    }

    /// Queue `value` under `key`. Returns false if `key` is already waiting
    /// or the buffer has no capacity at all.
    pub fn push(&mut self, key: K, value: V) -> bool {
        if self.capacity == 0 || self.contains(&key) {
            return false;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(Waiting {
            key,
            value,
            attempts: 0,
        });
        true
    }

    /// Try every waiting item once. Finished items leave with their result;
    /// items that used up their attempts are dropped.
    pub fn retry_round<T>(&mut self, mut op: impl FnMut(&K, &V) -> Attempt<T>) -> Vec<T> {
        let max_attempts = self.policy.max_attempts;
        let mut done = Vec::new();
        self.items.retain_mut(|item| match op(&item.key, &item.value) {
            Attempt::Done(result) => {
                done.push(result);
                false
            }
            Attempt::Retry => {
                item.attempts += 1;
                item.attempts < max_attempts
            }
        });
        done
    }

    /// Remove and return every item whose key matches, without spending an attempt
    pub fn take_where(&mut self, mut matches: impl FnMut(&K) -> bool) -> Vec<(K, V)> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if matches(&item.key) {
                taken.push((item.key, item.value));
            } else {
                kept.push_back(item);
            }
        }
        self.items = kept;
        taken
    }
}
