//! Worker statistics.
//!
//! Counters are registered by name once. Hot paths hold a [`StatHandle`]
//! resolved during setup and never look a name up per request.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub const TOTAL_CLIENTS: &str = "total_clients";
pub const MAX_BUFFER_SIZE: &str = "max_buffer_size";
pub const TOTAL_REQUESTS: &str = "total_requests";
pub const FAILED_REQUESTS: &str = "failed_requests";
pub const RUN_TIME_US: &str = "run_time_us";

/// Counters every worker publishes.
pub const WORKER_ITEMS: [&str; 5] = [
    TOTAL_CLIENTS,
    MAX_BUFFER_SIZE,
    TOTAL_REQUESTS,
    FAILED_REQUESTS,
    RUN_TIME_US,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    #[error("unknown stat item '{0}'")]
    UnknownItem(String),
}

/// A named counter cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatItem {
    pub name: String,
    pub value: u64,
}

/// Resolved reference to a registered counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatHandle(usize);

/// Registry of named counters.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    items: Vec<StatItem>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with [`WORKER_ITEMS`].
    pub fn with_worker_items() -> Self {
        let mut registry = Self::new();
        for name in WORKER_ITEMS {
            registry.register(name);
        }
        registry
    }

    /// Register a counter starting at zero. Registering an existing name
    /// returns the existing handle.
    pub fn register(&mut self, name: &str) -> StatHandle {
        if let Ok(handle) = self.lookup(name) {
            return handle;
        }
        self.items.push(StatItem {
            name: name.to_string(),
            value: 0,
        });
        StatHandle(self.items.len() - 1)
    }

    pub fn lookup(&self, name: &str) -> Result<StatHandle, StatsError> {
        self.items
            .iter()
            .position(|item| item.name == name)
            .map(StatHandle)
            .ok_or_else(|| StatsError::UnknownItem(name.to_string()))
    }

    pub fn get(&self, handle: StatHandle) -> u64 {
        self.items[handle.0].value
    }

    pub fn add(&mut self, handle: StatHandle, delta: u64) {
        let cell = &mut self.items[handle.0].value;
        *cell = cell.saturating_add(delta);
    }

    /// Raise the counter to `value` if it is currently lower.
    pub fn raise_to(&mut self, handle: StatHandle, value: u64) {
        let cell = &mut self.items[handle.0].value;
        if value > *cell {
            *cell = value;
        }
    }

    pub fn items(&self) -> &[StatItem] {
        &self.items
    }
}

/// Point-in-time copy of a worker's counters, sent to the supervisor.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub worker: String,
    pub taken_at: DateTime<Utc>,
    pub items: Vec<StatItem>,
}

impl StatsSnapshot {
    pub fn value(&self, name: &str) -> Option<u64> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.value)
    }
}

/// The worker counters with their handles resolved up front.
#[derive(Debug)]
pub struct WorkerStats {
    registry: StatsRegistry,
    total_clients: StatHandle,
    max_buffer_size: StatHandle,
    total_requests: StatHandle,
    failed_requests: StatHandle,
    run_time: StatHandle,
}

impl WorkerStats {
    /// Resolve the worker counters from `registry`.
    pub fn resolve(registry: StatsRegistry) -> Result<Self, StatsError> {
        Ok(Self {
            total_clients: registry.lookup(TOTAL_CLIENTS)?,
            max_buffer_size: registry.lookup(MAX_BUFFER_SIZE)?,
            total_requests: registry.lookup(TOTAL_REQUESTS)?,
            failed_requests: registry.lookup(FAILED_REQUESTS)?,
            run_time: registry.lookup(RUN_TIME_US)?,
            registry,
        })
    }

    pub fn client_served(&mut self, elapsed_us: u64) {
        self.registry.add(self.total_clients, 1);
        self.registry.add(self.run_time, elapsed_us);
    }

    pub fn buffer_observed(&mut self, size: usize) {
        self.registry.raise_to(self.max_buffer_size, size as u64);
    }

    pub fn request_ok(&mut self) {
        self.registry.add(self.total_requests, 1);
    }

    pub fn request_failed(&mut self) {
        self.registry.add(self.failed_requests, 1);
    }

    pub fn total_clients(&self) -> u64 {
        self.registry.get(self.total_clients)
    }

    pub fn max_buffer_size(&self) -> u64 {
        self.registry.get(self.max_buffer_size)
    }

    pub fn total_requests(&self) -> u64 {
        self.registry.get(self.total_requests)
    }

    pub fn failed_requests(&self) -> u64 {
        self.registry.get(self.failed_requests)
    }

    pub fn run_time_us(&self) -> u64 {
        self.registry.get(self.run_time)
    }

    pub fn snapshot(&self, worker: &str) -> StatsSnapshot {
        StatsSnapshot {
            worker: worker.to_string(),
            taken_at: Utc::now(),
            items: self.registry.items().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = StatsRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        assert_ne!(a, b);
        assert_eq!(registry.register("a"), a);
        assert_eq!(registry.lookup("b"), Ok(b));
        assert_eq!(
            registry.lookup("missing"),
            Err(StatsError::UnknownItem("missing".to_string()))
        );
    }

    #[test]
    fn test_add_and_raise() {
        let mut registry = StatsRegistry::new();
        let h = registry.register("peak");
        registry.raise_to(h, 10);
        registry.raise_to(h, 4);
        assert_eq!(registry.get(h), 10);
        registry.add(h, 5);
        assert_eq!(registry.get(h), 15);
    }

    #[test]
    fn test_resolve_requires_worker_items() {
        let mut registry = StatsRegistry::new();
        registry.register(TOTAL_CLIENTS);
        let err = WorkerStats::resolve(registry).unwrap_err();
        assert_eq!(err, StatsError::UnknownItem(MAX_BUFFER_SIZE.to_string()));
    }

    #[test]
    fn test_worker_stats_snapshot() {
        let mut stats = WorkerStats::resolve(StatsRegistry::with_worker_items()).unwrap();
        stats.client_served(250);
        stats.client_served(50);
        stats.request_ok();
        stats.request_failed();
        stats.buffer_observed(512);
        stats.buffer_observed(128);

        let snapshot = stats.snapshot("worker-0");
        assert_eq!(snapshot.worker, "worker-0");
        assert_eq!(snapshot.value(TOTAL_CLIENTS), Some(2));
        assert_eq!(snapshot.value(RUN_TIME_US), Some(300));
        assert_eq!(snapshot.value(TOTAL_REQUESTS), Some(1));
        assert_eq!(snapshot.value(FAILED_REQUESTS), Some(1));
        assert_eq!(snapshot.value(MAX_BUFFER_SIZE), Some(512));
        assert_eq!(snapshot.value("nope"), None);
    }
}
