use super::types::{CircuitRecord, CircuitState};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Shared storage for circuit records.
///
/// Every operation must be atomic with respect to other callers of the same
/// store, including callers in other processes when the store is external.
#[async_trait]
pub trait CircuitStore: Send + Sync {
    /// Read the current record; a missing record is a closed circuit
    async fn load(&self, dependency: &str) -> Result<CircuitRecord>;

    /// Increment the failure counter, pushing its expiry out to `window`
    async fn increment_failures(&self, dependency: &str, window: Duration) -> Result<u32>;

    /// Increment the half-open success counter
    async fn increment_successes(&self, dependency: &str, ttl: Duration) -> Result<u32>;

    /// Drop the failure counter
    async fn clear_failures(&self, dependency: &str) -> Result<()>;

    /// Move from `from` to `to` if the circuit is still in `from`.
    ///
    /// Entering `open` stamps `opened_at = now_ms`; every transition resets
    /// both counters; entering `closed` removes the record entirely.
    /// Returns whether this caller performed the transition.
    async fn transition(
        &self,
        dependency: &str,
        from: CircuitState,
        to: CircuitState,
        now_ms: i64,
        ttl: Duration,
    ) -> Result<bool>;

    /// Remove the record
    async fn reset(&self, dependency: &str) -> Result<()>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct Counter {
    value: u32,
    expires_at: Option<Instant>,
}

impl Counter {
    fn current(&self, now: Instant) -> u32 {
        match self.expires_at {
            Some(at) if at <= now => 0,
            _ => self.value,
        }
    }

    fn increment(&mut self, now: Instant, ttl: Duration) -> u32 {
        let value = self.current(now) + 1;
        self.value = value;
        self.expires_at = Some(now + ttl);
        value
    }
}

#[derive(Debug)]
struct Entry {
    state: CircuitState,
    opened_at: Option<i64>,
    state_expires_at: Option<Instant>,
    failures: Counter,
    successes: Counter,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            state_expires_at: None,
            failures: Counter::default(),
            successes: Counter::default(),
        }
    }

    fn current_state(&self, now: Instant) -> CircuitState {
        match self.state_expires_at {
            Some(at) if at <= now => CircuitState::Closed,
            _ => self.state,
        }
    }

    fn snapshot(&self, now: Instant) -> CircuitRecord {
        let state = self.current_state(now);
        CircuitRecord {
            state,
            failure_count: self.failures.current(now),
            success_count: self.successes.current(now),
            opened_at: if state == CircuitState::Closed && self.state != state {
                None
            } else {
                self.opened_at
            },
        }
    }
}

/// In-process circuit store.
///
/// Only processes sharing this value observe the same circuits, so it backs
/// tests, benchmarks and the fallback path when Redis is down at startup.
#[derive(Debug, Default)]
pub struct MemoryCircuitStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCircuitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CircuitStore for MemoryCircuitStore {
    async fn load(&self, dependency: &str) -> Result<CircuitRecord> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(dependency)
            .map(|entry| entry.snapshot(now))
            .unwrap_or_default())
    }

    async fn increment_failures(&self, dependency: &str, window: Duration) -> Result<u32> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(dependency.to_string())
            .or_insert_with(Entry::new);
        Ok(entry.failures.increment(now, window))
    }

    async fn increment_successes(&self, dependency: &str, ttl: Duration) -> Result<u32> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(dependency.to_string())
            .or_insert_with(Entry::new);
        Ok(entry.successes.increment(now, ttl))
    }

    async fn clear_failures(&self, dependency: &str) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(dependency) {
            entry.failures = Counter::default();
        }
        Ok(())
    }

    async fn transition(
        &self,
        dependency: &str,
        from: CircuitState,
        to: CircuitState,
        now_ms: i64,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(dependency.to_string())
            .or_insert_with(Entry::new);

        if entry.current_state(now) != from {
            return Ok(false);
        }

        if to == CircuitState::Closed {
            *entry = Entry::new();
            return Ok(true);
        }

        entry.state = to;
        entry.state_expires_at = Some(now + ttl);
        entry.failures = Counter::default();
        entry.successes = Counter::default();
        if to == CircuitState::Open {
            entry.opened_at = Some(now_ms);
        }
        Ok(true)
    }

    async fn reset(&self, dependency: &str) -> Result<()> {
        self.entries.remove(dependency);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
