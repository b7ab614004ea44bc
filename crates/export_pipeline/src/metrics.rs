use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for pipeline counters.
///
/// Injected into the batch processor and periodic reader by whoever builds the
/// pipeline; there is no process-wide registry.
pub trait MetricsSink: Send + Sync {
    /// Records rejected at admission (full queue or shut-down processor).
    fn record_dropped(&self, count: u64);

    /// Records delivered by a successful export.
    fn record_exported(&self, count: u64);

    /// Records lost to a failed export.
    fn record_failed(&self, count: u64);
}

/// Lock-free in-memory counters.
///
/// `dropped` sits on its own cache line: it is the only counter touched from
/// producer threads, the others are written by the worker.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    dropped: CachePadded<AtomicU64>,
    exported: AtomicU64,
    failed: AtomicU64,
    batches_exported: AtomicU64,
    batches_failed: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn exported(&self) -> u64 {
        self.exported.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dropped: self.dropped(),
            exported: self.exported(),
            failed: self.failed(),
            batches_exported: self.batches_exported(),
            batches_failed: self.batches_failed(),
        }
    }
}

impl MetricsSink for PipelineMetrics {
    fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    fn record_exported(&self, count: u64) {
        self.exported.fetch_add(count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::Relaxed);
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Plain copy of [`PipelineMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub dropped: u64,
    pub exported: u64,
    pub failed: u64,
    pub batches_exported: u64,
    pub batches_failed: u64,
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_dropped(&self, _count: u64) {}
    fn record_exported(&self, _count: u64) {}
    fn record_failed(&self, _count: u64) {}
}
