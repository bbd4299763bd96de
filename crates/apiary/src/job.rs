//! Job trait and registry
//!
//! Work units are registered once as named [`Job`] implementations; tasks
//! reference them by name. Workers never receive code, only a name plus
//! JSON arguments, so everything that runs on a worker thread is code the
//! host compiled in.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::RemoteError;

/// Execution input handed to a job on a worker thread.
#[derive(Debug, Clone, Default)]
pub struct JobInput {
    /// Positional JSON arguments
    pub args: Vec<Value>,
    /// Caller-supplied context values
    pub context: serde_json::Map<String, Value>,
    /// Ownership-transferred binary buffers
    pub buffers: Vec<Vec<u8>>,
}

/// A named unit of work executable on any worker thread.
///
/// Implementations must be stateless with respect to the calling task: the
/// same job instance runs concurrently on multiple workers.
pub trait Job: Send + Sync + 'static {
    /// Unique registry name.
    fn name(&self) -> &str;

    /// Execute the job. Runs on a worker thread; blocking is fine here.
    fn run(&self, input: JobInput) -> Result<Value, RemoteError>;

    /// Whether two calls with identical arguments produce identical results.
    ///
    /// Jobs returning `false` are exempt from request coalescing regardless
    /// of their name.
    fn deterministic(&self) -> bool {
        true
    }
}

/// Strongly-typed job with serde-backed argument decoding.
///
/// A convenience over [`Job`]: implementors declare concrete argument and
/// output types and the adapter handles the JSON boundary.
pub trait TypedJob: Send + Sync + 'static {
    /// Unique registry name.
    const NAME: &'static str;

    /// Decoded argument type.
    type Args: DeserializeOwned;

    /// Result type, serialized back to JSON for the caller.
    type Output: Serialize;

    /// Execute with decoded arguments.
    fn execute(&self, args: Self::Args, input: &JobInput) -> Result<Self::Output, RemoteError>;

    /// See [`Job::deterministic`].
    fn deterministic(&self) -> bool {
        true
    }
}

// Bridges a TypedJob into the type-erased registry.
struct TypedAdapter<T>(T);

impl<T: TypedJob> Job for TypedAdapter<T> {
    fn name(&self) -> &str {
        T::NAME
    }

    fn run(&self, input: JobInput) -> Result<Value, RemoteError> {
        // Zero args decode from null, one arg from the bare value, several
        // from the positional array.
        let raw = match input.args.len() {
            0 => Value::Null,
            1 => input.args[0].clone(),
            _ => Value::Array(input.args.clone()),
        };
        let args: T::Args = serde_json::from_value(raw).map_err(|e| {
            RemoteError::new(format!("invalid arguments for {}: {e}", T::NAME))
                .with_name("ArgumentError")
        })?;

        let output = self.0.execute(args, &input)?;
        serde_json::to_value(output).map_err(|e| {
            RemoteError::new(format!("unserializable result from {}: {e}", T::NAME))
                .with_name("ResultError")
        })
    }

    fn deterministic(&self) -> bool {
        self.0.deterministic()
    }
}

/// Registry mapping job names to implementations.
///
/// Built once before the pool starts and shared read-only with every worker.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job under its own name, replacing any previous entry.
    pub fn register(&mut self, job: impl Job) -> &mut Self {
        let job: Arc<dyn Job> = Arc::new(job);
        self.jobs.insert(job.name().to_string(), job);
        self
    }

    /// Register a [`TypedJob`] under its declared name.
    pub fn register_typed<T: TypedJob>(&mut self, job: T) -> &mut Self {
        self.jobs
            .insert(T::NAME.to_string(), Arc::new(TypedAdapter(job)));
        self
    }

    /// Look up a job by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).cloned()
    }

    /// Registered job names, unordered.
    pub fn names(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Per-worker bounded cache of resolved jobs.
///
/// Saves the shared-registry lookup for hot job names. Evicts in insertion
/// order once full.
pub(crate) struct ResolutionCache {
    entries: HashMap<String, Arc<dyn Job>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ResolutionCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(64)),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn resolve(&mut self, registry: &JobRegistry, name: &str) -> Option<Arc<dyn Job>> {
        if let Some(job) = self.entries.get(name) {
            return Some(job.clone());
        }
        let job = registry.resolve(name)?;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(name.to_string(), job.clone());
        self.order.push_back(name.to_string());
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    struct Doubler;

    impl Job for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn run(&self, input: JobInput) -> Result<Value, RemoteError> {
            let n = input.args[0].as_i64().unwrap_or(0);
            Ok(Value::from(n * 2))
        }
    }

    #[derive(Deserialize)]
    struct SumArgs {
        a: i64,
        b: i64,
    }

    struct Summer;

    impl TypedJob for Summer {
        const NAME: &'static str = "summer";
        type Args = SumArgs;
        type Output = i64;

        fn execute(&self, args: SumArgs, _input: &JobInput) -> Result<i64, RemoteError> {
            Ok(args.a + args.b)
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = JobRegistry::new();
        registry.register(Doubler);

        let job = registry.resolve("doubler").unwrap();
        let out = job
            .run(JobInput {
                args: vec![Value::from(21)],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out, Value::from(42));
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn test_typed_job_decodes_arguments() {
        let mut registry = JobRegistry::new();
        registry.register_typed(Summer);

        let job = registry.resolve("summer").unwrap();
        let out = job
            .run(JobInput {
                args: vec![serde_json::json!({"a": 40, "b": 2})],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out, Value::from(42));
    }

    #[test]
    fn test_typed_job_rejects_bad_arguments() {
        let mut registry = JobRegistry::new();
        registry.register_typed(Summer);

        let job = registry.resolve("summer").unwrap();
        let err = job
            .run(JobInput {
                args: vec![serde_json::json!("not an object")],
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.name, "ArgumentError");
    }

    #[test]
    fn test_resolution_cache_bounds_entries() {
        let mut registry = JobRegistry::new();
        registry.register(Doubler);
        registry.register_typed(Summer);

        let mut cache = ResolutionCache::new(1);
        assert!(cache.resolve(&registry, "doubler").is_some());
        assert!(cache.resolve(&registry, "summer").is_some());
        assert_eq!(cache.entries.len(), 1);
        // still resolvable through the registry after eviction
        assert!(cache.resolve(&registry, "doubler").is_some());
    }
}
