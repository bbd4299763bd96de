//! Pool counters and stats snapshots

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;

/// Monotonic counters shared across the pool. All updates are relaxed; these
/// feed diagnostics, not control flow.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) tasks_completed: AtomicU64,
    pub(crate) tasks_failed: AtomicU64,
    pub(crate) tasks_retried: AtomicU64,
    pub(crate) tasks_coalesced: AtomicU64,
    pub(crate) tasks_unique: AtomicU64,
    pub(crate) tasks_timed_out: AtomicU64,
    pub(crate) tasks_aborted: AtomicU64,
    pub(crate) affinity_hits: AtomicU64,
    pub(crate) affinity_misses: AtomicU64,
    pub(crate) workers_spawned: AtomicU64,
    pub(crate) workers_evicted: AtomicU64,
    pub(crate) temporary_workers_spawned: AtomicU64,
    pub(crate) temporary_tasks_executed: AtomicU64,
    pub(crate) temporary_execution_millis: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_temporary_execution(&self, elapsed: Duration) {
        self.temporary_tasks_executed.fetch_add(1, Ordering::Relaxed);
        self.temporary_execution_millis
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.tasks_completed.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.tasks_retried.store(0, Ordering::Relaxed);
        self.tasks_coalesced.store(0, Ordering::Relaxed);
        self.tasks_unique.store(0, Ordering::Relaxed);
        self.tasks_timed_out.store(0, Ordering::Relaxed);
        self.tasks_aborted.store(0, Ordering::Relaxed);
        self.affinity_hits.store(0, Ordering::Relaxed);
        self.affinity_misses.store(0, Ordering::Relaxed);
        self.workers_spawned.store(0, Ordering::Relaxed);
        self.workers_evicted.store(0, Ordering::Relaxed);
        self.temporary_workers_spawned.store(0, Ordering::Relaxed);
        self.temporary_tasks_executed.store(0, Ordering::Relaxed);
        self.temporary_execution_millis.store(0, Ordering::Relaxed);
    }

    pub(crate) fn reset_coalescing(&self) {
        self.tasks_coalesced.store(0, Ordering::Relaxed);
        self.tasks_unique.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot_into(&self, stats: &mut PoolStats) {
        stats.tasks_completed = self.tasks_completed.load(Ordering::Relaxed);
        stats.tasks_failed = self.tasks_failed.load(Ordering::Relaxed);
        stats.tasks_retried = self.tasks_retried.load(Ordering::Relaxed);
        stats.tasks_coalesced = self.tasks_coalesced.load(Ordering::Relaxed);
        stats.tasks_unique = self.tasks_unique.load(Ordering::Relaxed);
        stats.tasks_timed_out = self.tasks_timed_out.load(Ordering::Relaxed);
        stats.tasks_aborted = self.tasks_aborted.load(Ordering::Relaxed);
        stats.affinity_hits = self.affinity_hits.load(Ordering::Relaxed);
        stats.affinity_misses = self.affinity_misses.load(Ordering::Relaxed);
        stats.workers_spawned = self.workers_spawned.load(Ordering::Relaxed);
        stats.workers_evicted = self.workers_evicted.load(Ordering::Relaxed);
        stats.temporary_workers_spawned =
            self.temporary_workers_spawned.load(Ordering::Relaxed);
        stats.temporary_tasks_executed =
            self.temporary_tasks_executed.load(Ordering::Relaxed);
        stats.temporary_execution_millis =
            self.temporary_execution_millis.load(Ordering::Relaxed);
    }

    pub(crate) fn coalescing_snapshot(&self, in_flight: usize) -> CoalescingStats {
        CoalescingStats {
            coalesced: self.tasks_coalesced.load(Ordering::Relaxed),
            unique: self.tasks_unique.load(Ordering::Relaxed),
            in_flight,
        }
    }
}

/// Per-worker activity, included in [`PoolStats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerStats {
    pub id: u64,
    pub busy: bool,
    pub temporary: bool,
    pub tasks_executed: u64,
    pub failed_tasks: u64,
    /// Total time spent executing tasks, in milliseconds
    pub execution_millis: u64,
}

/// Request-coalescing activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoalescingStats {
    /// Calls that joined an already-running identical task
    pub coalesced: u64,
    /// Calls that started a fresh coalescable execution
    pub unique: u64,
    /// In-flight coalescable executions right now
    pub in_flight: usize,
}

/// Point-in-time snapshot of pool activity.
///
/// Counter fields are cumulative since pool creation (or the last shutdown);
/// gauge fields reflect the instant the snapshot was taken.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PoolStats {
    /// Live pooled and temporary workers
    pub workers: usize,
    /// Workers currently executing a task
    pub busy_workers: usize,
    /// Workers parked and available
    pub idle_workers: usize,
    /// Tasks waiting for a worker, all priorities combined
    pub queued_tasks: usize,
    /// Queue depth per band
    pub queued_high: usize,
    pub queued_normal: usize,
    pub queued_low: usize,
    /// Temporary overflow workers currently alive
    pub temporary_workers: usize,
    /// Per-worker breakdown
    pub worker_details: Vec<WorkerStats>,
    /// The configuration in effect when the snapshot was taken
    pub config: PoolConfig,

    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub tasks_coalesced: u64,
    pub tasks_unique: u64,
    pub tasks_timed_out: u64,
    pub tasks_aborted: u64,
    pub affinity_hits: u64,
    pub affinity_misses: u64,
    pub workers_spawned: u64,
    pub workers_evicted: u64,
    pub temporary_workers_spawned: u64,
    pub temporary_tasks_executed: u64,
    pub temporary_execution_millis: u64,
}
