//! Task execution pipeline
//!
//! Layered controller-side flow: `run_task` handles validation and
//! coalescing, `run_with_retry` the backoff loop, `execute_once` a single
//! dispatch racing the worker reply against timeout and cancellation. The
//! race settles exactly once; the losing branches are never observed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::RetryPolicy;
use crate::error::{ConfigError, TaskError};
use crate::fingerprint::task_fingerprint;
use crate::job::JobInput;
use crate::pool::{Envelope, PoolInner, Priority, TaskEnvelope};

/// Fully-specified task invocation, produced by the builder.
#[derive(Clone)]
pub(crate) struct TaskRequest {
    pub(crate) job: String,
    pub(crate) args: Vec<Value>,
    pub(crate) context: serde_json::Map<String, Value>,
    pub(crate) buffers: Vec<Vec<u8>>,
    pub(crate) priority: Priority,
    pub(crate) timeout: Option<Duration>,
    pub(crate) signal: Option<CancellationToken>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) no_coalesce: bool,
}

impl PoolInner {
    #[instrument(skip_all, fields(job = %request.job))]
    pub(crate) async fn run_task(self: &Arc<Self>, request: TaskRequest) -> Result<Value, TaskError> {
        let max_name_len = self.config.read().security.max_job_name_len;
        if request.job.len() > max_name_len {
            return Err(TaskError::Validation(ConfigError::JobNameTooLong {
                len: request.job.len(),
                max: max_name_len,
            }));
        }

        let Some(job) = self.registry.resolve(&request.job) else {
            return Err(TaskError::UnknownJob { name: request.job });
        };

        // coalescing requires repeatable work and a fingerprint that fully
        // describes it; cancellation signals and transferred buffers are
        // caller-specific, so those tasks always run fresh
        let coalescable = self.config.read().coalescing
            && !request.no_coalesce
            && request.signal.is_none()
            && request.buffers.is_empty()
            && job.deterministic()
            && !self.detector.lock().is_non_deterministic(&request.job);

        if !coalescable {
            return self.clone().run_with_retry(request).await;
        }

        let key = task_fingerprint(&request.job, &request.args, &request.context);
        let this = self.clone();
        let (execution, joined) = self
            .coalescing
            .join_or_start(&key, move || this.run_with_retry(request).boxed());
        if joined {
            self.counters.incr(&self.counters.tasks_coalesced);
            debug!(fingerprint = %key, "joined in-flight task");
        } else {
            self.counters.incr(&self.counters.tasks_unique);
        }
        execution.await
    }

    async fn run_with_retry(self: Arc<Self>, request: TaskRequest) -> Result<Value, TaskError> {
        let policy = request
            .retry
            .clone()
            .unwrap_or_else(|| self.config.read().retry.clone());
        let max_attempts = if policy.enabled {
            policy.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0u32;
        loop {
            match self.execute_once(&request).await {
                Ok(value) => return Ok(value),
                // cancellation and deadline are final: the caller stopped
                // waiting, a retry would answer nobody
                Err(e @ (TaskError::Aborted | TaskError::Timeout { .. })) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    let delay = policy.delay_for_attempt(attempt - 1);
                    self.counters.incr(&self.counters.tasks_retried);
                    debug!(
                        job = %request.job,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying task"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn execute_once(self: &Arc<Self>, request: &TaskRequest) -> Result<Value, TaskError> {
        if let Some(signal) = &request.signal {
            if signal.is_cancelled() {
                self.counters.incr(&self.counters.tasks_aborted);
                return Err(TaskError::Aborted);
            }
        }
        if let Some(timeout) = request.timeout {
            if timeout.is_zero() {
                self.counters.incr(&self.counters.tasks_timed_out);
                return Err(TaskError::Timeout { timeout });
            }
        }

        let affinity_key = request.job.as_str();
        let lease = self.acquire(request.priority, Some(affinity_key)).await?;
        let started = Instant::now();

        let (reply_tx, mut reply_rx) = oneshot::channel();
        let envelope = Envelope::Task(TaskEnvelope {
            job: request.job.clone(),
            input: JobInput {
                args: request.args.clone(),
                context: request.context.clone(),
                buffers: request.buffers.clone(),
            },
            reply: reply_tx,
        });
        if lease.sender.send(envelope).is_err() {
            self.force_terminate(lease.worker_id);
            return Err(TaskError::Worker {
                message: "worker inbox closed".to_string(),
                cause: None,
            });
        }

        let deadline = async {
            match request.timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => futures::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        let cancelled = async {
            match &request.signal {
                Some(signal) => signal.cancelled().await,
                None => futures::future::pending().await,
            }
        };
        tokio::pin!(cancelled);

        tokio::select! {
            reply = &mut reply_rx => match reply {
                Ok(Ok(value)) => {
                    self.release(&lease, Some(affinity_key), started.elapsed(), false);
                    self.counters.incr(&self.counters.tasks_completed);
                    Ok(value)
                }
                Ok(Err(remote)) => {
                    self.release(&lease, Some(affinity_key), started.elapsed(), true);
                    self.counters.incr(&self.counters.tasks_failed);
                    Err(TaskError::from_remote(remote))
                }
                Err(_) => {
                    self.force_terminate(lease.worker_id);
                    if self.is_shutdown() {
                        Err(TaskError::Shutdown)
                    } else {
                        self.counters.incr(&self.counters.tasks_failed);
                        Err(TaskError::Worker {
                            message: "worker disconnected".to_string(),
                            cause: None,
                        })
                    }
                }
            },
            _ = &mut deadline => {
                self.force_terminate(lease.worker_id);
                self.counters.incr(&self.counters.tasks_timed_out);
                Err(TaskError::Timeout {
                    timeout: request.timeout.unwrap_or_default(),
                })
            }
            _ = &mut cancelled => {
                self.force_terminate(lease.worker_id);
                self.counters.incr(&self.counters.tasks_aborted);
                Err(TaskError::Aborted)
            }
        }
    }
}
