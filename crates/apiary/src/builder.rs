//! Fluent task builder and curried invocation
//!
//! ```no_run
//! # async fn demo(pool: apiary::PoolManager) -> Result<(), apiary::TaskError> {
//! let meshed = pool
//!     .task("mesh_chunk")
//!     .param(serde_json::json!({"cx": 4, "cz": -2}))
//!     .timeout(std::time::Duration::from_secs(2))
//!     .await?;
//! # let _ = meshed;
//! # Ok(())
//! # }
//! ```

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{RetryPolicy, RESERVED_CONTEXT_KEYS};
use crate::error::{ConfigError, TaskError};
use crate::execute::TaskRequest;
use crate::pool::{PoolInner, Priority};

/// Builder for a single task invocation. Created by
/// [`PoolManager::task`](crate::PoolManager::task); awaiting it (or calling
/// [`execute`](Self::execute)) dispatches the task.
#[derive(Clone)]
pub struct TaskBuilder {
    inner: Arc<PoolInner>,
    request: TaskRequest,
}

impl TaskBuilder {
    pub(crate) fn new(inner: Arc<PoolInner>, job: String) -> Self {
        Self {
            inner,
            request: TaskRequest {
                job,
                args: Vec::new(),
                context: serde_json::Map::new(),
                buffers: Vec::new(),
                priority: Priority::default(),
                timeout: None,
                signal: None,
                retry: None,
                no_coalesce: false,
            },
        }
    }

    /// Append one positional argument.
    pub fn param(mut self, value: impl Into<Value>) -> Self {
        self.request.args.push(value.into());
        self
    }

    /// Replace the positional arguments wholesale.
    pub fn using_params(mut self, params: Vec<Value>) -> Self {
        self.request.args = params;
        self
    }

    /// Attach a context value visible to the job.
    ///
    /// Rejects reserved keys when the pool's security config blocks them.
    pub fn set_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, ConfigError> {
        let key = key.into();
        if self.inner.config.read().security.block_reserved_keys
            && RESERVED_CONTEXT_KEYS.contains(&key.as_str())
        {
            return Err(ConfigError::ReservedContextKey(key));
        }
        self.request.context.insert(key, value.into());
        Ok(self)
    }

    /// Merge a whole context map in one call, checking every key.
    pub fn with_context(
        mut self,
        context: serde_json::Map<String, Value>,
    ) -> Result<Self, ConfigError> {
        for (key, value) in context {
            self = self.set_context(key, value)?;
        }
        Ok(self)
    }

    /// Cancel the task when this token fires. Cancellable tasks are never
    /// coalesced.
    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.request.signal = Some(token);
        self
    }

    /// Hand binary buffers to the job. Tasks with buffers are never
    /// coalesced.
    pub fn transfer(mut self, buffers: Vec<Vec<u8>>) -> Self {
        self.request.buffers.extend(buffers);
        self
    }

    /// Override the pool's retry policy for this task.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.request.retry = Some(policy);
        self
    }

    /// Queue priority when the pool is saturated.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.request.priority = priority;
        self
    }

    /// Opt this task out of request coalescing.
    pub fn no_coalesce(mut self) -> Self {
        self.request.no_coalesce = true;
        self
    }

    /// Fail with [`TaskError::Timeout`] after `timeout`. A zero timeout
    /// fails immediately without dispatching.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Dispatch and await the result.
    pub async fn execute(self) -> Result<Value, TaskError> {
        self.inner.run_task(self.request).await
    }

    /// Dispatch and decode the JSON result into `T`.
    pub async fn execute_as<T: DeserializeOwned>(self) -> Result<T, TaskError> {
        let value = self.execute().await?;
        serde_json::from_value(value).map_err(|e| TaskError::Worker {
            message: format!("failed to decode task result: {e}"),
            cause: None,
        })
    }

    /// Dispatch, capturing the outcome as a [`Settled`] instead of an `Err`.
    pub async fn execute_safe(self) -> Settled {
        self.execute().await.into()
    }
}

impl IntoFuture for TaskBuilder {
    type Output = Result<Value, TaskError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.execute().boxed()
    }
}

/// Outcome of a safe-mode execution: never an `Err`, always inspectable.
#[derive(Debug, Clone)]
pub enum Settled {
    Fulfilled(Value),
    Rejected(TaskError),
}

impl Settled {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Fulfilled(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Self::Fulfilled(_) => None,
            Self::Rejected(error) => Some(error),
        }
    }

    pub fn into_result(self) -> Result<Value, TaskError> {
        match self {
            Self::Fulfilled(value) => Ok(value),
            Self::Rejected(error) => Err(error),
        }
    }
}

impl From<Result<Value, TaskError>> for Settled {
    fn from(result: Result<Value, TaskError>) -> Self {
        match result {
            Ok(value) => Self::Fulfilled(value),
            Err(error) => Self::Rejected(error),
        }
    }
}

/// Curried invocation: collect arguments call by call, then await.
///
/// ```no_run
/// # async fn demo(pool: apiary::PoolManager) -> Result<(), apiary::TaskError> {
/// let add = pool.curry("add");
/// let five = add.clone().arg(2).arg(3).await?;
/// let nine = add.arg(4).arg(5).await?;
/// # let _ = (five, nine);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Curried {
    builder: TaskBuilder,
}

impl Curried {
    pub(crate) fn new(builder: TaskBuilder) -> Self {
        Self { builder }
    }

    /// Append one argument, returning a new curried handle.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.builder = self.builder.param(value);
        self
    }

    /// Attach a context value, subject to the same reserved-key check as
    /// [`TaskBuilder::set_context`].
    pub fn bind(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self, ConfigError> {
        self.builder = self.builder.set_context(key, value)?;
        Ok(self)
    }

    /// Merge a whole context map in one call.
    pub fn with_context(
        mut self,
        context: serde_json::Map<String, Value>,
    ) -> Result<Self, ConfigError> {
        self.builder = self.builder.with_context(context)?;
        Ok(self)
    }

    /// Finish with the full builder API.
    pub fn into_builder(self) -> TaskBuilder {
        self.builder
    }
}

impl IntoFuture for Curried {
    type Output = Result<Value, TaskError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.builder.execute().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::error::RemoteError;
    use crate::job::{Job, JobInput, JobRegistry, TypedJob};
    use crate::pool::PoolManager;

    struct Double;

    impl TypedJob for Double {
        const NAME: &'static str = "double";
        type Args = i64;
        type Output = i64;

        fn execute(&self, args: i64, _input: &JobInput) -> Result<i64, RemoteError> {
            Ok(args * 2)
        }
    }

    struct Add;

    impl Job for Add {
        fn name(&self) -> &str {
            "add"
        }

        fn run(&self, input: JobInput) -> Result<Value, RemoteError> {
            let sum: i64 = input.args.iter().filter_map(Value::as_i64).sum();
            Ok(Value::from(sum))
        }
    }

    struct ContextReader;

    impl Job for ContextReader {
        fn name(&self) -> &str {
            "context_reader"
        }

        fn run(&self, input: JobInput) -> Result<Value, RemoteError> {
            Ok(input
                .context
                .get("world")
                .cloned()
                .unwrap_or(Value::Null))
        }
    }

    fn pool() -> PoolManager {
        let mut registry = JobRegistry::new();
        registry.register(Add);
        registry.register(ContextReader);
        registry.register_typed(Double);
        PoolManager::new(PoolConfig::default().with_pool_size(2), registry).unwrap()
    }

    #[tokio::test]
    async fn test_run_job_uses_declared_name() {
        let pool = pool();
        let doubled: i64 = pool
            .run_job::<Double>()
            .param(21)
            .execute_as()
            .await
            .unwrap();
        assert_eq!(doubled, 42);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_builder_is_awaitable() {
        let pool = pool();
        let sum = pool.task("add").param(2).param(3).await.unwrap();
        assert_eq!(sum, Value::from(5));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_context_reaches_job() {
        let pool = pool();
        let value = pool
            .task("context_reader")
            .set_context("world", "overworld")
            .unwrap()
            .execute()
            .await
            .unwrap();
        assert_eq!(value, Value::from("overworld"));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_with_context_merges_map() {
        let pool = pool();
        let mut context = serde_json::Map::new();
        context.insert("world".to_string(), Value::from("nether"));
        let value = pool
            .task("context_reader")
            .with_context(context.clone())
            .unwrap()
            .execute()
            .await
            .unwrap();
        assert_eq!(value, Value::from("nether"));

        context.insert("constructor".to_string(), Value::from(1));
        assert!(pool.task("context_reader").with_context(context).is_err());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_reserved_context_key_rejected() {
        let pool = pool();
        let err = pool.task("add").set_context("__proto__", 1).err().unwrap();
        assert!(matches!(err, ConfigError::ReservedContextKey(_)));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_safe_never_errors() {
        let pool = pool();
        let ok = pool.task("add").param(1).param(1).execute_safe().await;
        assert!(ok.is_fulfilled());
        assert_eq!(ok.value(), Some(&Value::from(2)));

        let bad = pool.task("ghost").execute_safe().await;
        assert!(!bad.is_fulfilled());
        assert_eq!(bad.error().unwrap().code(), "ERR_UNKNOWN_JOB");
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_curried_accumulates_args() {
        let pool = pool();
        let add = pool.curry("add");
        let five = add.clone().arg(2).arg(3).await.unwrap();
        let ten = add.arg(1).arg(2).arg(3).arg(4).await.unwrap();
        assert_eq!(five, Value::from(5));
        assert_eq!(ten, Value::from(10));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_as_decodes_typed_result() {
        let pool = pool();
        let sum: i64 = pool.task("add").param(20).param(22).execute_as().await.unwrap();
        assert_eq!(sum, 42);
        pool.shutdown().await;
    }
}
