// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Telemetry hooks for the synchronization loop.
//!
//! Embedders can implement [`SyncTelemetry`] to observe refresh outcomes
//! without depending on the controller internals. [`NoopTelemetry`] is used by
//! default; [`CountingTelemetry`] keeps atomic counters that can be exported
//! to any metrics backend.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::fetcher::FetchError;

/// Telemetry hook invoked on significant synchronization events.
pub trait SyncTelemetry: Send + Sync {
    /// Called after a fetched release was installed; `persisted` is false when
    /// the cache already held the same fingerprint.
    fn on_namespace_applied(&self, _namespace: &str, _fingerprint: &str, _persisted: bool) {}
    /// Called when a namespace was served from the local cache instead of the server.
    fn on_cache_fallback(&self, _namespace: &str, _found: bool) {}
    /// Called after the table was rebuilt from the local cache.
    fn on_degraded(&self, _restored: usize) {}
    /// Called when a cycle ended early without touching the table.
    fn on_cycle_aborted(&self, _error: &FetchError) {}
}

/// Default telemetry implementation that performs no-ops.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl SyncTelemetry for NoopTelemetry {}

/// Aggregated telemetry counters (all values use relaxed atomics).
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    namespaces_applied: AtomicU64,
    cache_writes: AtomicU64,
    cache_fallbacks: AtomicU64,
    cache_misses: AtomicU64,
    degraded_cycles: AtomicU64,
    aborted_cycles: AtomicU64,
}

impl TelemetryCounters {
    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            namespaces_applied: self.namespaces_applied.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            cache_fallbacks: self.cache_fallbacks.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            degraded_cycles: self.degraded_cycles.load(Ordering::Relaxed),
            aborted_cycles: self.aborted_cycles.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`TelemetryCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Fetched releases installed into the table.
    pub namespaces_applied: u64,
    /// Cache artifacts actually written (fingerprint changed).
    pub cache_writes: u64,
    /// Namespaces restored from an existing cache artifact instead of the server.
    pub cache_fallbacks: u64,
    /// Fallbacks for which no cache artifact existed.
    pub cache_misses: u64,
    /// Cycles that rebuilt the table from disk.
    pub degraded_cycles: u64,
    /// Cycles that ended early on a timeout-class error.
    pub aborted_cycles: u64,
}

impl fmt::Display for TelemetrySnapshot {
    /// Formats the snapshot metrics into a comma-separated list for logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "namespaces_applied={}, cache_writes={}, cache_fallbacks={}, cache_misses={}, degraded_cycles={}, aborted_cycles={}",
            self.namespaces_applied,
            self.cache_writes,
            self.cache_fallbacks,
            self.cache_misses,
            self.degraded_cycles,
            self.aborted_cycles
        )
    }
}

/// Telemetry implementation that maintains atomic counters for every signal.
#[derive(Debug, Clone)]
pub struct CountingTelemetry {
    counters: Arc<TelemetryCounters>,
}

impl CountingTelemetry {
    /// Creates a new telemetry instance backed by the provided counter set.
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self { counters }
    }

    /// Returns the underlying counter set.
    pub fn counters(&self) -> Arc<TelemetryCounters> {
        self.counters.clone()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.counters.snapshot()
    }
}

impl Default for CountingTelemetry {
    fn default() -> Self {
        Self::new(Arc::new(TelemetryCounters::default()))
    }
}

impl SyncTelemetry for CountingTelemetry {
    fn on_namespace_applied(&self, _namespace: &str, _fingerprint: &str, persisted: bool) {
        self.counters
            .namespaces_applied
            .fetch_add(1, Ordering::Relaxed);
        if persisted {
            self.counters.cache_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_cache_fallback(&self, _namespace: &str, found: bool) {
        let counter = if found {
            &self.counters.cache_fallbacks
        } else {
            &self.counters.cache_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn on_degraded(&self, _restored: usize) {
        self.counters.degraded_cycles.fetch_add(1, Ordering::Relaxed);
    }

    fn on_cycle_aborted(&self, _error: &FetchError) {
        self.counters.aborted_cycles.fetch_add(1, Ordering::Relaxed);
    }
}
