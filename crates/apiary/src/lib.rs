//! Apiary: a worker task-execution core for latency-sensitive clients.
//!
//! Jobs are registered once by name in a [`JobRegistry`], then dispatched to
//! a pool of worker threads through a fluent builder API:
//!
//! ```no_run
//! use apiary::{Job, JobInput, JobRegistry, PoolConfig, PoolManager, RemoteError};
//! use serde_json::Value;
//!
//! struct MeshChunk;
//!
//! impl Job for MeshChunk {
//!     fn name(&self) -> &str {
//!         "mesh_chunk"
//!     }
//!
//!     fn run(&self, input: JobInput) -> Result<Value, RemoteError> {
//!         // heavy geometry work happens off the main thread
//!         Ok(Value::from(input.args.len()))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = JobRegistry::new();
//! registry.register(MeshChunk);
//! let pool = PoolManager::new(PoolConfig::default(), registry)?;
//!
//! let mesh = pool
//!     .task("mesh_chunk")
//!     .param(serde_json::json!({"cx": 0, "cz": 0}))
//!     .await?;
//! # let _ = mesh;
//! # Ok(())
//! # }
//! ```
//!
//! The pool balances load with worker affinity, coalesces identical
//! in-flight requests, retries transient failures with jittered backoff,
//! and races every dispatch against its timeout and cancellation signal.
//! Bulk collection work goes through the [`turbo`](PoolManager::turbo) and
//! [`max`](PoolManager::max) engines, which chunk the input across workers
//! and reassemble results in order.

pub mod builder;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod turbo;

mod coalesce;
mod execute;

pub use builder::{Curried, Settled, TaskBuilder};
pub use config::{PoolConfig, RetryPolicy, SecurityConfig};
pub use error::{ConfigError, RemoteError, TaskError};
pub use job::{Job, JobInput, JobRegistry, TypedJob};
pub use metrics::{CoalescingStats, PoolStats, WorkerStats};
pub use pool::{PoolManager, Priority};
pub use turbo::{BulkStats, TurboExecutor};

pub use tokio_util::sync::CancellationToken;
