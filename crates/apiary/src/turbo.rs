//! Bulk parallel engines
//!
//! `turbo` splits large collections into per-worker chunks and reassembles
//! results in order. Inputs below [`TURBO_THRESHOLD`] are not worth fanning
//! out: filter and reduce run inline on the caller, map on a single worker.
//! `max` always splits one chunk more than the worker count and computes the
//! extra chunk synchronously on the caller, so the controller thread does
//! useful work instead of just waiting.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::duration_millis;
use crate::error::{ConfigError, TaskError};
use crate::fingerprint::type_fingerprint;
use crate::pool::PoolInner;

/// Item count below which chunked dispatch costs more than it saves.
pub(crate) const TURBO_THRESHOLD: usize = 10_000;

/// Target minimum items per chunk when sizing the fan-out.
const MIN_ITEMS_PER_WORKER: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BulkMode {
    Turbo,
    Max,
}

/// How a bulk run was split up, returned by
/// [`TurboExecutor::map_with_stats`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkStats {
    /// Items processed
    pub items: usize,
    /// Chunks the input was split into, including the caller's own chunk in
    /// max mode
    pub chunks: usize,
    /// Chunks dispatched to pool workers
    pub workers: usize,
    /// Wall-clock time for the whole run
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// Handle to the bulk engines. Created by
/// [`PoolManager::turbo`](crate::PoolManager::turbo) and
/// [`PoolManager::max`](crate::PoolManager::max).
#[derive(Clone)]
pub struct TurboExecutor {
    inner: Arc<PoolInner>,
    mode: BulkMode,
    workers: Option<usize>,
}

impl TurboExecutor {
    pub(crate) fn new(inner: Arc<PoolInner>, mode: BulkMode) -> Self {
        Self {
            inner,
            mode,
            workers: None,
        }
    }

    /// Override the automatic fan-out width. Clamped to the pool size.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }
        self.workers = Some(workers);
        Ok(self)
    }

    fn fan_out(&self, items: usize) -> usize {
        let cap = self.inner.config.read().pool_size.max(1);
        match self.workers {
            Some(w) => w.clamp(1, cap),
            None => items.div_ceil(MIN_ITEMS_PER_WORKER).clamp(1, cap),
        }
    }

    fn below_threshold(&self, items: usize) -> bool {
        self.mode == BulkMode::Turbo && self.workers.is_none() && items < TURBO_THRESHOLD
    }

    /// Apply `f` to every item in parallel, preserving order.
    pub async fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, TaskError>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let (out, _) = self.map_with_stats(items, f).await?;
        Ok(out)
    }

    /// Like [`map`](Self::map), but also report how the run was split up.
    pub async fn map_with_stats<T, R, F>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Result<(Vec<R>, BulkStats), TaskError>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let total = items.len();
        let started = Instant::now();
        if total == 0 {
            return Ok((
                Vec::new(),
                BulkStats {
                    items: 0,
                    chunks: 0,
                    workers: 0,
                    duration: started.elapsed(),
                },
            ));
        }

        let remote_chunks = if self.below_threshold(total) {
            // still a worker hop: map results must come from off the caller
            1
        } else {
            self.fan_out(total)
        };

        let out = self
            .run_chunked(items, remote_chunks, move |chunk, abort| {
                let mut out = Vec::with_capacity(chunk.len());
                for item in chunk {
                    if abort.load(Ordering::Relaxed) {
                        return None;
                    }
                    out.push(f(item));
                }
                Some(out)
            })
            .await?;

        let chunks = match self.mode {
            BulkMode::Turbo => remote_chunks,
            BulkMode::Max => remote_chunks + 1,
        };
        Ok((
            out,
            BulkStats {
                items: total,
                chunks,
                workers: remote_chunks,
                duration: started.elapsed(),
            },
        ))
    }

    /// Keep the items `f` accepts, preserving order.
    pub async fn filter<T, F>(&self, items: Vec<T>, f: F) -> Result<Vec<T>, TaskError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        if self.below_threshold(total) {
            return Ok(items.into_iter().filter(|item| f(item)).collect());
        }

        let chunk_count = self.fan_out(total);
        self.run_chunked(items, chunk_count, move |chunk, abort| {
            let mut kept = Vec::new();
            for item in chunk {
                if abort.load(Ordering::Relaxed) {
                    return None;
                }
                if f(item) {
                    kept.push(item.clone());
                }
            }
            Some(kept)
        })
        .await
    }

    /// Fold the items in parallel.
    ///
    /// Each chunk folds from a clone of `init` and the partials are folded
    /// with the same function, so `f` must be associative and `init` its
    /// identity value (e.g. `0` for sums, `1` for products).
    pub async fn reduce<T, F>(&self, items: Vec<T>, init: T, f: F) -> Result<T, TaskError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(T, &T) -> T + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(init);
        }
        if self.below_threshold(total) {
            return Ok(items.iter().fold(init, f));
        }

        let chunk_count = self.fan_out(total);
        let f = Arc::new(f);
        let seed = init.clone();
        let fold = {
            let f = f.clone();
            move |chunk: &[T], abort: &AtomicBool| {
                let mut acc = seed.clone();
                for item in chunk {
                    if abort.load(Ordering::Relaxed) {
                        return None;
                    }
                    acc = f(acc, item);
                }
                Some(vec![acc])
            }
        };
        let partials = self.run_chunked(items, chunk_count, fold).await?;
        Ok(partials.iter().fold(init, |acc, partial| f(acc, partial)))
    }

    /// Map over a slice of floats through shared memory: workers write their
    /// results straight into a shared atomic output buffer instead of
    /// shipping per-chunk vectors back. Worth it for large numeric batches.
    pub async fn map_shared<F>(&self, items: &[f64], f: F) -> Result<Vec<f64>, TaskError>
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let input: Arc<[f64]> = Arc::from(items);
        let output: Arc<Vec<AtomicU64>> =
            Arc::new((0..total).map(|_| AtomicU64::new(0)).collect());
        let completed = Arc::new(AtomicUsize::new(0));
        let f = Arc::new(f);
        let affinity = type_fingerprint::<F>();

        let remote_chunks = if self.below_threshold(total) {
            1
        } else {
            self.fan_out(total)
        };
        let chunk_count = match self.mode {
            BulkMode::Turbo => remote_chunks,
            BulkMode::Max => remote_chunks + 1,
        };
        let chunk_size = total.div_ceil(chunk_count);
        debug!(total, chunk_count, chunk_size, "dispatching shared-memory map");

        let mut ranges = Vec::with_capacity(chunk_count);
        for index in 0..chunk_count {
            let start = index * chunk_size;
            let end = ((index + 1) * chunk_size).min(total);
            if start < end {
                ranges.push((start, end));
            }
        }
        let local = match self.mode {
            BulkMode::Max => ranges.pop(),
            BulkMode::Turbo => None,
        };

        let mut handles = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            let input = input.clone();
            let output = output.clone();
            let completed = completed.clone();
            let f = f.clone();
            let work: Box<dyn FnOnce() + Send> = Box::new(move || {
                for i in start..end {
                    output[i].store(f(input[i]).to_bits(), Ordering::Relaxed);
                }
                completed.fetch_add(end - start, Ordering::Release);
            });
            let inner = self.inner.clone();
            let key = affinity.clone();
            handles.push(tokio::spawn(async move { inner.run_chunk(&key, work).await }));
        }

        if let Some((start, end)) = local {
            for i in start..end {
                output[i].store(f(input[i]).to_bits(), Ordering::Relaxed);
            }
            completed.fetch_add(end - start, Ordering::Release);
        }

        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(TaskError::Worker {
                        message: format!("chunk task failed: {e}"),
                        cause: None,
                    });
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }
        if completed.load(Ordering::Acquire) != total {
            return Err(TaskError::Worker {
                message: "shared-memory map completed with missing items".to_string(),
                cause: None,
            });
        }

        Ok(output
            .iter()
            .map(|bits| f64::from_bits(bits.load(Ordering::Relaxed)))
            .collect())
    }

    /// Chunked fan-out shared by map, filter, and reduce. The per-chunk
    /// closure returns `None` when it bailed out on the abort flag.
    async fn run_chunked<T, R, W>(
        &self,
        items: Vec<T>,
        chunk_count: usize,
        work: W,
    ) -> Result<Vec<R>, TaskError>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        W: Fn(&[T], &AtomicBool) -> Option<Vec<R>> + Send + Sync + 'static,
    {
        let total = items.len();
        let chunk_count = match self.mode {
            BulkMode::Turbo => chunk_count,
            BulkMode::Max => chunk_count + 1,
        };
        let chunk_size = total.div_ceil(chunk_count);
        debug!(total, chunk_count, chunk_size, "dispatching chunked work");

        let work = Arc::new(work);
        let abort = Arc::new(AtomicBool::new(false));
        let affinity = type_fingerprint::<W>();

        let mut chunks: Vec<Vec<T>> = items.chunks(chunk_size).map(<[T]>::to_vec).collect();
        let local = match self.mode {
            BulkMode::Max => chunks.pop(),
            BulkMode::Turbo => None,
        };

        let mut handles = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let work = work.clone();
            let chunk_abort = abort.clone();
            let (out_tx, out_rx) = oneshot::channel::<Vec<R>>();
            let job: Box<dyn FnOnce() + Send> = Box::new(move || {
                if let Some(out) = work(chunk.as_slice(), &chunk_abort) {
                    let _ = out_tx.send(out);
                }
            });

            let inner = self.inner.clone();
            let key = affinity.clone();
            let abort = abort.clone();
            handles.push(tokio::spawn(async move {
                let result = match inner.run_chunk(&key, job).await {
                    Ok(()) => out_rx.await.map_err(|_| TaskError::Aborted),
                    Err(e) => Err(e),
                };
                if result.is_err() {
                    abort.store(true, Ordering::Relaxed);
                }
                result
            }));
        }

        // the caller's own chunk, in max mode
        let local_out = match local {
            Some(chunk) => work(chunk.as_slice(), &abort),
            None => Some(Vec::new()),
        };

        let mut output = Vec::with_capacity(total);
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(part)) => output.extend(part),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    first_error.get_or_insert(TaskError::Worker {
                        message: format!("chunk task failed: {e}"),
                        cause: None,
                    });
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }
        match local_out {
            Some(part) => output.extend(part),
            None => return Err(TaskError::Aborted),
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::job::JobRegistry;
    use crate::pool::PoolManager;

    fn pool(pool_size: usize) -> PoolManager {
        PoolManager::new(
            PoolConfig::default().with_pool_size(pool_size),
            JobRegistry::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_map_preserves_order_and_length() {
        let pool = pool(4);
        let items: Vec<i64> = (0..20_000).collect();
        let doubled = pool.turbo().map(items.clone(), |n| n * 2).await.unwrap();
        assert_eq!(doubled.len(), items.len());
        assert_eq!(doubled[0], 0);
        assert_eq!(doubled[19_999], 39_998);
        assert!(doubled.windows(2).all(|w| w[1] == w[0] + 2));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_small_map_runs_on_one_worker() {
        let pool = pool(4);
        let squared = pool.turbo().map(vec![1, 2, 3], |n: &i32| n * n).await.unwrap();
        assert_eq!(squared, vec![1, 4, 9]);
        assert_eq!(pool.stats().workers, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_map_with_stats_reports_fan_out() {
        let pool = pool(4);
        let items: Vec<i64> = (0..20_000).collect();
        let (out, stats) = pool
            .turbo()
            .map_with_stats(items, |n| n + 1)
            .await
            .unwrap();
        assert_eq!(out.len(), 20_000);
        assert_eq!(stats.items, 20_000);
        // 20k items at 1000 per chunk, capped by 4 workers
        assert_eq!(stats.chunks, 4);
        assert_eq!(stats.workers, 4);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_filter_small_runs_inline() {
        let pool = pool(4);
        let evens = pool
            .turbo()
            .filter((0..100).collect(), |n: &i32| n % 2 == 0)
            .await
            .unwrap();
        assert_eq!(evens.len(), 50);
        // inline path spawned nothing
        assert_eq!(pool.stats().workers, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_filter_large_preserves_order() {
        let pool = pool(4);
        let items: Vec<i64> = (0..30_000).collect();
        let kept = pool
            .turbo()
            .filter(items, |n| n % 3 == 0)
            .await
            .unwrap();
        assert_eq!(kept.len(), 10_000);
        assert!(kept.windows(2).all(|w| w[0] < w[1]));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_reduce_sums_at_every_fan_out() {
        let pool = pool(4);
        let items: Vec<i64> = (1..=100).collect();
        for workers in 1..=4 {
            let sum = pool
                .turbo()
                .with_workers(workers)
                .unwrap()
                .reduce(items.clone(), 0, |acc, n| acc + n)
                .await
                .unwrap();
            assert_eq!(sum, 5050);
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_reduce_small_runs_inline() {
        let pool = pool(4);
        let sum = pool
            .turbo()
            .reduce((1..=100).collect::<Vec<i64>>(), 0, |acc, n| acc + n)
            .await
            .unwrap();
        assert_eq!(sum, 5050);
        assert_eq!(pool.stats().workers, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_max_mode_runs_last_chunk_locally() {
        let pool = pool(2);
        let items: Vec<i64> = (0..12_000).collect();
        let tripled = pool.max().map(items, |n| n * 3).await.unwrap();
        assert_eq!(tripled.len(), 12_000);
        assert_eq!(tripled[11_999], 35_997);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_map_shared_round_trips_floats() {
        let pool = pool(4);
        let items: Vec<f64> = (0..15_000).map(|n| n as f64).collect();
        let halved = pool.turbo().map_shared(&items, |x| x / 2.0).await.unwrap();
        assert_eq!(halved.len(), items.len());
        assert_eq!(halved[10], 5.0);
        assert_eq!(halved[14_999], 7499.5);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let pool = pool(4);
        assert!(matches!(
            pool.turbo().with_workers(0),
            Err(ConfigError::InvalidWorkerCount)
        ));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_inputs_short_circuit() {
        let pool = pool(4);
        let mapped: Vec<i32> = pool.turbo().map(Vec::<i32>::new(), |n| *n).await.unwrap();
        assert!(mapped.is_empty());
        let reduced = pool
            .turbo()
            .reduce(Vec::<i64>::new(), 7, |acc, n| acc + n)
            .await
            .unwrap();
        assert_eq!(reduced, 7);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_chunk_surfaces_worker_error() {
        let pool = pool(2);
        let err = pool
            .turbo()
            .map(vec![1, 2, 3], |n: &i32| {
                if *n == 2 {
                    panic!("bad item");
                }
                *n
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_WORKER");
        let cause = err.remote_cause().unwrap();
        assert_eq!(cause.name, "Panic");
        pool.shutdown().await;
    }
}
