//! Per-source call statistics.
//!
//! Owned by the caller and handed to the [`Verifier`](crate::Verifier); the
//! engine only writes to it. Numbers are diagnostic and never influence
//! verification.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

/// Running statistics for one adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStat {
    pub success_count: u64,
    pub failure_count: u64,
    /// Mean latency over every call, successful or not.
    pub average_latency: Duration,
}

impl SourceStat {
    pub fn calls(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn record(&mut self, ok: bool, elapsed: Duration) {
        let previous = self.calls();
        if ok {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        let total = self.average_latency.as_nanos() * u128::from(previous) + elapsed.as_nanos();
        let mean = total / u128::from(self.calls());
        self.average_latency = Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX));
    }
}

#[derive(Debug, Default)]
pub struct SourceMetrics {
    stats: DashMap<String, SourceStat>,
}

impl SourceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one adapter call. `ok` means the adapter returned without error.
    pub fn record(&self, source: &str, ok: bool, elapsed: Duration) {
        self.stats
            .entry(source.to_string())
            .or_default()
            .record(ok, elapsed);
    }

    pub fn get(&self, source: &str) -> Option<SourceStat> {
        self.stats.get(source).map(|s| *s)
    }

    /// Copy of every source's statistics, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, SourceStat> {
        self.stats
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}
