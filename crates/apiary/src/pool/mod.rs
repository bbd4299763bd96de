//! Worker pool management
//!
//! Owns the worker threads, the wait queue, and checkout/release. Workers are
//! plain OS threads fed through an mpsc inbox; the controller side is async
//! and never blocks while holding the state lock. Temporary overflow workers
//! handle bursts beyond the pooled capacity and are torn down after a single
//! task.

mod entry;
mod queue;

pub use queue::Priority;

pub(crate) use entry::{ChunkEnvelope, Envelope, Lease, TaskEnvelope, WorkerEntry};
pub(crate) use queue::WaitQueue;

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::builder::{Curried, TaskBuilder};
use crate::coalesce::CoalescingTable;
use crate::config::PoolConfig;
use crate::error::{ConfigError, RemoteError, TaskError};
use crate::fingerprint::DetectorCache;
use crate::job::{JobRegistry, ResolutionCache, TypedJob};
use crate::metrics::{CoalescingStats, PoolCounters, PoolStats, WorkerStats};
use crate::turbo::{BulkMode, TurboExecutor, TURBO_THRESHOLD};

/// Handle to a worker pool. Cheap to clone; all clones share the same pool.
#[derive(Clone)]
pub struct PoolManager {
    pub(crate) inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    pub(crate) config: RwLock<PoolConfig>,
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) state: Mutex<PoolState>,
    pub(crate) counters: PoolCounters,
    pub(crate) coalescing: Arc<CoalescingTable>,
    pub(crate) detector: Mutex<DetectorCache>,
}

pub(crate) struct PoolState {
    pub(crate) workers: Vec<WorkerEntry>,
    pub(crate) queue: WaitQueue,
    pub(crate) next_worker_id: u64,
    pub(crate) temporary_active: usize,
    pub(crate) shutdown: bool,
}

impl PoolManager {
    /// Create a pool over a registry of jobs.
    ///
    /// `min_threads` workers are spawned warm immediately; the rest come up
    /// on demand.
    pub fn new(config: PoolConfig, registry: JobRegistry) -> Result<Self, ConfigError> {
        config.validate()?;

        let detector_capacity = if config.low_memory_mode { 10 } else { 500 };
        let min_threads = config.min_threads;
        let pool_size = config.pool_size;
        let inner = Arc::new(PoolInner {
            config: RwLock::new(config),
            registry: Arc::new(registry),
            state: Mutex::new(PoolState {
                workers: Vec::with_capacity(pool_size),
                queue: WaitQueue::default(),
                next_worker_id: 0,
                temporary_active: 0,
                shutdown: false,
            }),
            counters: PoolCounters::default(),
            coalescing: CoalescingTable::new(),
            detector: Mutex::new(DetectorCache::new(detector_capacity)),
        });

        let pool = Self { inner };
        pool.warmup(min_threads);
        info!(pool_size, min_threads, "pool created");
        Ok(pool)
    }

    /// Create a pool with default configuration.
    pub fn with_defaults(registry: JobRegistry) -> Result<Self, ConfigError> {
        Self::new(PoolConfig::default(), registry)
    }

    /// Pre-spawn idle workers until `n` pooled workers are live (capped at
    /// `pool_size`). Returns how many were actually spawned.
    pub fn warmup(&self, n: usize) -> usize {
        let target = n.min(self.inner.config.read().pool_size);
        let mut state = self.inner.state.lock();
        if state.shutdown {
            return 0;
        }
        let mut spawned = 0;
        while state.workers.iter().filter(|w| !w.temporary).count() < target {
            match self.inner.spawn_worker(&mut state, false) {
                Ok(lease) => {
                    if let Some(worker) =
                        state.workers.iter_mut().find(|w| w.id == lease.worker_id)
                    {
                        worker.busy = false;
                    }
                    spawned += 1;
                }
                Err(e) => {
                    warn!(error = %e, "failed to prewarm worker");
                    break;
                }
            }
        }
        spawned
    }

    /// Adjust configuration in place. The new configuration is validated
    /// before it takes effect, and only affects future decisions; live
    /// workers and queued tasks are untouched.
    pub fn configure(
        &self,
        apply: impl FnOnce(&mut PoolConfig),
    ) -> Result<(), ConfigError> {
        let mut config = self.inner.config.write();
        let mut updated = config.clone();
        apply(&mut updated);
        updated.validate()?;
        *config = updated;
        Ok(())
    }

    /// Current configuration.
    pub fn config(&self) -> PoolConfig {
        self.inner.config.read().clone()
    }

    /// Switch request coalescing on or off for future tasks.
    pub fn set_coalescing(&self, enabled: bool) {
        self.inner.config.write().coalescing = enabled;
    }

    pub fn is_coalescing_enabled(&self) -> bool {
        self.inner.config.read().coalescing
    }

    /// Coalescing counters plus the current in-flight table size.
    pub fn coalescing_stats(&self) -> CoalescingStats {
        self.inner
            .counters
            .coalescing_snapshot(self.inner.coalescing.len())
    }

    pub fn reset_coalescing_stats(&self) {
        self.inner.counters.reset_coalescing();
    }

    /// Item count at which the bulk engines start fanning out.
    pub fn turbo_threshold(&self) -> usize {
        TURBO_THRESHOLD
    }

    /// Start building a task for the named job.
    pub fn task(&self, job: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(self.inner.clone(), job.into())
    }

    /// Start building a task for a [`TypedJob`]'s registered name.
    pub fn run_job<J: TypedJob>(&self) -> TaskBuilder {
        self.task(J::NAME)
    }

    /// Curried form: accumulate arguments one call at a time, then await.
    pub fn curry(&self, job: impl Into<String>) -> Curried {
        Curried::new(self.task(job))
    }

    /// Bulk engine sized by item count, capped at the pool size.
    pub fn turbo(&self) -> TurboExecutor {
        TurboExecutor::new(self.inner.clone(), BulkMode::Turbo)
    }

    /// Bulk engine that splits one extra chunk and runs it on the caller.
    pub fn max(&self) -> TurboExecutor {
        TurboExecutor::new(self.inner.clone(), BulkMode::Max)
    }

    /// Point-in-time activity snapshot.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        let (queued_high, queued_normal, queued_low) = state.queue.band_depths();
        let mut stats = PoolStats {
            workers: state.workers.len(),
            busy_workers: state.workers.iter().filter(|w| w.busy).count(),
            idle_workers: state.workers.iter().filter(|w| !w.busy).count(),
            queued_tasks: state.queue.len(),
            queued_high,
            queued_normal,
            queued_low,
            temporary_workers: state.temporary_active,
            worker_details: state
                .workers
                .iter()
                .map(|w| WorkerStats {
                    id: w.id,
                    busy: w.busy,
                    temporary: w.temporary,
                    tasks_executed: w.tasks_executed,
                    failed_tasks: w.failed_tasks,
                    execution_millis: w.total_execution.as_millis() as u64,
                })
                .collect(),
            config: self.inner.config.read().clone(),
            ..Default::default()
        };
        self.inner.counters.snapshot_into(&mut stats);
        stats
    }

    /// Reset cumulative counters without touching live workers.
    pub fn reset_stats(&self) {
        self.inner.counters.reset();
    }

    /// Tear the pool down.
    ///
    /// Queued tasks are rejected with [`TaskError::Shutdown`]; running tasks
    /// finish their current work before their threads exit. Idempotent.
    pub async fn shutdown(&self) {
        let threads = {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.queue.drain();
            state.temporary_active = 0;
            let workers = std::mem::take(&mut state.workers);
            workers
                .into_iter()
                .filter_map(|mut w| {
                    // outstanding lease clones may keep the inbox open, so
                    // the thread is told to exit rather than waiting for
                    // every sender to drop
                    let _ = w.sender.send(Envelope::Stop);
                    w.thread.take()
                })
                .collect::<Vec<_>>()
        };
        self.inner.coalescing.clear();

        let join = tokio::task::spawn_blocking(move || {
            for handle in threads {
                let _ = handle.join();
            }
        })
        .await;
        if join.is_err() {
            warn!("worker join task failed during shutdown");
        }

        self.inner.counters.reset();
        info!("pool shut down");
    }
}

impl PoolInner {
    fn affinity_enabled(&self) -> bool {
        !self.config.read().low_memory_mode
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Check a worker out, waiting in the priority queue when the pool is
    /// saturated.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        priority: Priority,
        affinity_key: Option<&str>,
    ) -> Result<Lease, TaskError> {
        let waiter = {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(TaskError::Shutdown);
            }
            if let Some(lease) = self.try_checkout(&mut state, affinity_key)? {
                return Ok(lease);
            }
            let max_queue_size = self.config.read().max_queue_size;
            if state.queue.len() >= max_queue_size {
                return Err(TaskError::QueueFull { max: max_queue_size });
            }
            state.queue.push(priority)
        };
        waiter.await.map_err(|_| TaskError::Shutdown)
    }

    /// Synchronous checkout under the state lock. Selection order: idle
    /// affinity hit, least-used idle worker, new pooled worker, temporary
    /// overflow worker.
    fn try_checkout(
        &self,
        state: &mut PoolState,
        affinity_key: Option<&str>,
    ) -> Result<Option<Lease>, TaskError> {
        if let Some(key) = affinity_key {
            if self.affinity_enabled() {
                let hit = state
                    .workers
                    .iter()
                    .position(|w| !w.busy && w.has_affinity(key));
                if let Some(pos) = hit {
                    self.counters.incr(&self.counters.affinity_hits);
                    let worker = &mut state.workers[pos];
                    worker.busy = true;
                    worker.cancel_idle_timer();
                    return Ok(Some(worker.lease()));
                }
                // a miss only counts when there was an idle worker to hit
                if state.workers.iter().any(|w| !w.busy) {
                    self.counters.incr(&self.counters.affinity_misses);
                }
            }
        }

        // least-used idle worker; a fresh one short-circuits the scan
        let mut best: Option<(usize, u64)> = None;
        for (pos, worker) in state.workers.iter().enumerate() {
            if worker.busy {
                continue;
            }
            if worker.tasks_executed == 0 {
                best = Some((pos, 0));
                break;
            }
            if best.map_or(true, |(_, tasks)| worker.tasks_executed < tasks) {
                best = Some((pos, worker.tasks_executed));
            }
        }
        if let Some((pos, _)) = best {
            let worker = &mut state.workers[pos];
            worker.busy = true;
            worker.cancel_idle_timer();
            return Ok(Some(worker.lease()));
        }

        let (pool_size, max_temporary) = {
            let config = self.config.read();
            (config.pool_size, config.max_temporary_workers)
        };
        let pooled = state.workers.iter().filter(|w| !w.temporary).count();
        if pooled < pool_size {
            return self.spawn_worker(state, false).map(Some);
        }

        if state.temporary_active < max_temporary {
            return self.spawn_worker(state, true).map(Some);
        }

        Ok(None)
    }

    /// Spawn a worker thread and register it busy.
    fn spawn_worker(&self, state: &mut PoolState, temporary: bool) -> Result<Lease, TaskError> {
        let id = state.next_worker_id;
        state.next_worker_id += 1;

        let (tx, rx) = std::sync::mpsc::channel();
        let registry = self.registry.clone();
        let cache_size = self.config.read().effective_cache_size();
        let thread = std::thread::Builder::new()
            .name(format!("apiary-worker-{id}"))
            .spawn(move || worker_loop(rx, registry, cache_size))
            .map_err(|e| TaskError::Worker {
                message: format!("failed to spawn worker thread: {e}"),
                cause: None,
            })?;

        let worker = WorkerEntry::new(id, tx, temporary, thread);
        let lease = worker.lease();
        state.workers.push(worker);
        state.temporary_active += usize::from(temporary);

        self.counters.incr(&self.counters.workers_spawned);
        if temporary {
            self.counters.incr(&self.counters.temporary_workers_spawned);
        }
        debug!(worker_id = id, temporary, "spawned worker");
        Ok(lease)
    }

    /// Return a leased worker after a finished task.
    ///
    /// Temporary workers are torn down; pooled workers are handed directly to
    /// the next queued waiter or parked with an idle-eviction timer.
    pub(crate) fn release(
        self: &Arc<Self>,
        lease: &Lease,
        affinity_key: Option<&str>,
        elapsed: Duration,
        failed: bool,
    ) {
        let mut state = self.state.lock();
        let Some(pos) = state.workers.iter().position(|w| w.id == lease.worker_id) else {
            // force-terminated while the task was finishing
            return;
        };

        {
            let worker = &mut state.workers[pos];
            worker.record_task(elapsed, failed);
            if self.affinity_enabled() {
                if let Some(key) = affinity_key {
                    worker.record_affinity(key);
                }
            }
        }

        if lease.temporary {
            let worker = state.workers.swap_remove(pos);
            state.temporary_active = state.temporary_active.saturating_sub(1);
            self.counters.add_temporary_execution(elapsed);
            debug!(worker_id = worker.id, "released temporary worker");
            return;
        }

        if !state.shutdown {
            while let Some(waiter) = state.queue.pop_live() {
                if waiter.send(state.workers[pos].lease()).is_ok() {
                    return;
                }
            }
        }

        let worker = &mut state.workers[pos];
        worker.busy = false;
        worker.cancel_idle_timer();
        worker.idle_timer = Some(self.arm_idle_timer(lease.worker_id));
    }

    /// Kill a worker whose task will never be collected (timeout or abort).
    /// The thread exits after its current work; the stale reply is dropped.
    pub(crate) fn force_terminate(&self, worker_id: u64) {
        let mut state = self.state.lock();
        if let Some(pos) = state.workers.iter().position(|w| w.id == worker_id) {
            let worker = state.workers.swap_remove(pos);
            if worker.temporary {
                state.temporary_active = state.temporary_active.saturating_sub(1);
            }
            debug!(worker_id, "force-terminated worker");
        }
    }

    fn arm_idle_timer(self: &Arc<Self>, worker_id: u64) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let timeout = self.config.read().worker_idle_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.evict_if_idle(worker_id);
        })
    }

    fn evict_if_idle(&self, worker_id: u64) {
        let mut state = self.state.lock();
        let floor = self.config.read().eviction_floor();
        let pooled = state.workers.iter().filter(|w| !w.temporary).count();
        if pooled <= floor {
            return;
        }
        if let Some(pos) = state
            .workers
            .iter()
            .position(|w| w.id == worker_id && !w.busy && !w.temporary)
        {
            state.workers.swap_remove(pos);
            self.counters.incr(&self.counters.workers_evicted);
            debug!(worker_id, "evicted idle worker");
        }
    }

    /// Run an opaque bulk chunk on a worker and wait for completion.
    pub(crate) async fn run_chunk(
        self: &Arc<Self>,
        affinity_key: &str,
        work: Box<dyn FnOnce() + Send>,
    ) -> Result<(), TaskError> {
        let lease = self.acquire(Priority::Normal, Some(affinity_key)).await?;
        let started = Instant::now();

        let (reply_tx, reply_rx) = oneshot::channel();
        if lease
            .sender
            .send(Envelope::Chunk(ChunkEnvelope {
                work,
                reply: reply_tx,
            }))
            .is_err()
        {
            self.force_terminate(lease.worker_id);
            return Err(TaskError::Worker {
                message: "worker inbox closed".to_string(),
                cause: None,
            });
        }

        match reply_rx.await {
            Ok(Ok(_)) => {
                self.release(&lease, Some(affinity_key), started.elapsed(), false);
                Ok(())
            }
            Ok(Err(remote)) => {
                self.release(&lease, Some(affinity_key), started.elapsed(), true);
                Err(TaskError::from_remote(remote))
            }
            Err(_) => {
                self.force_terminate(lease.worker_id);
                if self.is_shutdown() {
                    Err(TaskError::Shutdown)
                } else {
                    Err(TaskError::Worker {
                        message: "worker disconnected".to_string(),
                        cause: None,
                    })
                }
            }
        }
    }
}

/// Worker thread main loop. Resolves jobs through a bounded per-worker cache
/// and isolates panics so one bad task never takes the thread down.
fn worker_loop(rx: Receiver<Envelope>, registry: Arc<JobRegistry>, cache_size: usize) {
    let mut cache = ResolutionCache::new(cache_size);
    while let Ok(envelope) = rx.recv() {
        match envelope {
            Envelope::Task(task) => {
                let result = match cache.resolve(&registry, &task.job) {
                    Some(job) => {
                        let input = task.input;
                        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            job.run(input)
                        })) {
                            Ok(result) => result,
                            Err(payload) => Err(RemoteError::from_panic(payload)),
                        }
                    }
                    None => Err(RemoteError::new(format!(
                        "no job registered under name: {}",
                        task.job
                    ))
                    .with_name("UnknownJob")),
                };
                let _ = task.reply.send(result);
            }
            Envelope::Chunk(chunk) => {
                let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(chunk.work))
                {
                    Ok(()) => Ok(Value::Null),
                    Err(payload) => Err(RemoteError::from_panic(payload)),
                };
                let _ = chunk.reply.send(result);
            }
            Envelope::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobInput};

    struct Echo;

    impl Job for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn run(&self, input: JobInput) -> Result<Value, RemoteError> {
            Ok(input.args.into_iter().next().unwrap_or(Value::Null))
        }
    }

    fn small_pool(pool_size: usize, max_queue: usize) -> PoolManager {
        let mut registry = JobRegistry::new();
        registry.register(Echo);
        let config = PoolConfig::default()
            .with_pool_size(pool_size)
            .with_max_queue_size(max_queue)
            .with_max_temporary_workers(0);
        PoolManager::new(config, registry).unwrap()
    }

    fn idle_release(pool: &PoolManager, lease: &Lease) {
        pool.inner.release(lease, None, Duration::ZERO, false);
    }

    #[tokio::test]
    async fn test_acquire_spawns_on_demand() {
        let pool = small_pool(2, 10);
        let a = pool.inner.acquire(Priority::Normal, None).await.unwrap();
        let b = pool.inner.acquire(Priority::Normal, None).await.unwrap();
        assert_ne!(a.worker_id, b.worker_id);
        assert_eq!(pool.stats().busy_workers, 2);

        idle_release(&pool, &a);
        idle_release(&pool, &b);
        assert_eq!(pool.stats().idle_workers, 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full_when_saturated() {
        let pool = small_pool(1, 0);
        let lease = pool.inner.acquire(Priority::Normal, None).await.unwrap();

        let err = pool.inner.acquire(Priority::Normal, None).await.unwrap_err();
        assert!(matches!(err, TaskError::QueueFull { max: 0 }));

        idle_release(&pool, &lease);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_hands_worker_to_waiter() {
        let pool = small_pool(1, 10);
        let lease = pool.inner.acquire(Priority::Normal, None).await.unwrap();

        let inner = pool.inner.clone();
        let waiter = tokio::spawn(async move { inner.acquire(Priority::Normal, None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        idle_release(&pool, &lease);
        let handed = waiter.await.unwrap().unwrap();
        assert_eq!(handed.worker_id, lease.worker_id);
        idle_release(&pool, &handed);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_affinity_prefers_previous_worker() {
        let pool = small_pool(2, 10);

        let first = pool.inner.acquire(Priority::Normal, Some("mesh")).await.unwrap();
        pool.inner
            .release(&first, Some("mesh"), Duration::from_millis(2), false);

        // spin up and idle a second worker with more executed tasks
        let other = pool.inner.acquire(Priority::Normal, None).await.unwrap();
        let second = pool.inner.acquire(Priority::Normal, None).await.unwrap();
        idle_release(&pool, &other);
        idle_release(&pool, &second);

        let again = pool.inner.acquire(Priority::Normal, Some("mesh")).await.unwrap();
        assert_eq!(again.worker_id, first.worker_id);
        assert_eq!(pool.stats().affinity_hits, 1);
        pool.inner
            .release(&again, Some("mesh"), Duration::ZERO, false);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_temporary_worker_spawned_past_pool_size() {
        let mut registry = JobRegistry::new();
        registry.register(Echo);
        let config = PoolConfig::default()
            .with_pool_size(1)
            .with_max_temporary_workers(1)
            .with_max_queue_size(10);
        let pool = PoolManager::new(config, registry).unwrap();

        let pooled = pool.inner.acquire(Priority::Normal, None).await.unwrap();
        let temp = pool.inner.acquire(Priority::Normal, None).await.unwrap();
        assert!(temp.temporary);
        assert_eq!(pool.stats().temporary_workers, 1);

        pool.inner
            .release(&temp, None, Duration::from_millis(8), false);
        let stats = pool.stats();
        assert_eq!(stats.temporary_workers, 0);
        assert_eq!(stats.workers, 1);
        assert_eq!(stats.temporary_tasks_executed, 1);
        assert_eq!(stats.temporary_execution_millis, 8);

        idle_release(&pool, &pooled);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_completes_with_outstanding_lease() {
        let pool = small_pool(2, 10);
        let lease = pool.inner.acquire(Priority::Normal, None).await.unwrap();

        // the held lease keeps a sender clone alive; the stop envelope lets
        // the thread exit and the join finish anyway
        pool.shutdown().await;
        assert_eq!(pool.stats().workers, 0);
        drop(lease);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_acquires() {
        let pool = small_pool(2, 10);
        pool.shutdown().await;
        let err = pool.inner.acquire(Priority::Normal, None).await.unwrap_err();
        assert!(matches!(err, TaskError::Shutdown));
    }

    #[tokio::test]
    async fn test_min_threads_prewarmed_idle() {
        let mut registry = JobRegistry::new();
        registry.register(Echo);
        let config = PoolConfig::default().with_pool_size(4).with_min_threads(2);
        let pool = PoolManager::new(config, registry).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.idle_workers, 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_warmup_caps_at_pool_size() {
        let pool = small_pool(3, 10);
        assert_eq!(pool.warmup(10), 3);
        assert_eq!(pool.stats().idle_workers, 3);
        // already warm, nothing more to do
        assert_eq!(pool.warmup(10), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_configure_validates_and_applies() {
        let pool = small_pool(2, 10);

        let err = pool.configure(|c| c.pool_size = 0).unwrap_err();
        assert!(matches!(err, ConfigError::PoolSizeZero));
        assert_eq!(pool.config().pool_size, 2);

        pool.configure(|c| c.max_queue_size = 5).unwrap();
        assert_eq!(pool.config().max_queue_size, 5);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_coalescing_toggle() {
        let pool = small_pool(2, 10);
        assert!(pool.is_coalescing_enabled());
        pool.set_coalescing(false);
        assert!(!pool.is_coalescing_enabled());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats_expose_worker_details() {
        let pool = small_pool(2, 10);
        let lease = pool.inner.acquire(Priority::Normal, None).await.unwrap();
        pool.inner
            .release(&lease, None, Duration::from_millis(12), true);

        let stats = pool.stats();
        assert_eq!(stats.worker_details.len(), 1);
        let detail = &stats.worker_details[0];
        assert_eq!(detail.tasks_executed, 1);
        assert_eq!(detail.failed_tasks, 1);
        assert_eq!(detail.execution_millis, 12);
        assert_eq!(stats.config.pool_size, 2);
        pool.shutdown().await;
    }
}
