//! Error taxonomy for task execution
//!
//! Every runtime failure carries a stable machine-readable code so callers can
//! branch on failure class without string-matching messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An error reconstructed from a worker thread.
///
/// Workers report failures over the reply channel as plain data; the engine
/// rebuilds them on the controller side preserving the name, message, an
/// optional backtrace string, a recursively nested `cause`, any aggregated
/// child errors, and primitive-valued custom properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteError {
    /// Error type name (e.g. the job's own error enum variant name)
    pub name: String,

    /// Human-readable message
    pub message: String,

    /// Captured backtrace, when the job provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,

    /// The error that caused this one, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<RemoteError>>,

    /// Nested child errors (aggregate-error support)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RemoteError>,

    /// Additional primitive-valued properties attached by the job
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl RemoteError {
    /// Create a new remote error with the default `"Error"` name.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            backtrace: None,
            cause: None,
            errors: Vec::new(),
            properties: serde_json::Map::new(),
        }
    }

    /// Set the error name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach a causing error.
    pub fn with_cause(mut self, cause: RemoteError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach aggregated child errors.
    pub fn with_errors(mut self, errors: Vec<RemoteError>) -> Self {
        self.errors = errors;
        self
    }

    /// Attach a primitive-valued custom property.
    ///
    /// Non-primitive values (objects, arrays) are silently dropped; only
    /// null, booleans, numbers, and strings survive the channel crossing.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        if matches!(
            value,
            serde_json::Value::Null
                | serde_json::Value::Bool(_)
                | serde_json::Value::Number(_)
                | serde_json::Value::String(_)
        ) {
            self.properties.insert(key.into(), value);
        }
        self
    }

    /// Build a remote error from a captured panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker panicked".to_string()
        };
        Self::new(message).with_name("Panic")
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Runtime task failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Caller cancelled the task via its cancellation token
    #[error("operation was aborted")]
    Aborted,

    /// Task exceeded its deadline
    #[error("worker timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// Pending-task queue is at capacity
    #[error("task queue full (max {max})")]
    QueueFull {
        /// The configured maximum queue size
        max: usize,
    },

    /// The job failed or the worker thread died
    #[error("worker error: {message}")]
    Worker {
        /// Summary message
        message: String,
        /// The reconstructed worker-side error, when one was reported
        cause: Option<RemoteError>,
    },

    /// Pool torn down while the request was pending
    #[error("pool shutting down")]
    Shutdown,

    /// No job registered under the requested name
    #[error("no job registered under name: {name}")]
    UnknownJob {
        /// The unresolved job name
        name: String,
    },

    /// Request rejected by validation before dispatch
    #[error("invalid task request: {0}")]
    Validation(ConfigError),
}

impl TaskError {
    /// Stable machine-readable code for this error class.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Aborted => "ERR_ABORTED",
            Self::Timeout { .. } => "ERR_TIMEOUT",
            Self::QueueFull { .. } => "ERR_QUEUE_FULL",
            Self::Worker { .. } => "ERR_WORKER",
            Self::Shutdown => "ERR_SHUTDOWN",
            Self::UnknownJob { .. } => "ERR_UNKNOWN_JOB",
            Self::Validation(_) => "ERR_VALIDATION",
        }
    }

    /// The reconstructed worker-side error, if this is a worker failure.
    pub fn remote_cause(&self) -> Option<&RemoteError> {
        match self {
            Self::Worker { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn from_remote(remote: RemoteError) -> Self {
        Self::Worker {
            message: remote.message.clone(),
            cause: Some(remote),
        }
    }
}

/// Configuration and validation errors, reported synchronously at call sites.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Pool must hold at least one worker
    #[error("pool_size must be at least 1")]
    PoolSizeZero,

    /// Warm floor cannot exceed the pool capacity
    #[error("min_threads ({min_threads}) cannot exceed pool_size ({pool_size})")]
    MinThreadsExceedsPoolSize {
        /// Configured warm floor
        min_threads: usize,
        /// Configured pool capacity
        pool_size: usize,
    },

    /// Per-worker resolution cache needs room for at least one entry
    #[error("function_cache_size must be at least 1")]
    FunctionCacheSizeZero,

    /// Retry must allow at least one attempt
    #[error("retry max_attempts must be at least 1")]
    RetryAttemptsZero,

    /// Worker count for bulk engines must be positive
    #[error("worker count must be a positive integer")]
    InvalidWorkerCount,

    /// Context key collides with a reserved engine field
    #[error("context key {0:?} is reserved")]
    ReservedContextKey(String),

    /// Job name exceeds the configured security limit
    #[error("job name exceeds maximum length ({len} > {max})")]
    JobNameTooLong {
        /// Actual name length in bytes
        len: usize,
        /// Configured maximum
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(TaskError::Aborted.code(), "ERR_ABORTED");
        assert_eq!(
            TaskError::Timeout {
                timeout: Duration::from_millis(5)
            }
            .code(),
            "ERR_TIMEOUT"
        );
        assert_eq!(TaskError::QueueFull { max: 10 }.code(), "ERR_QUEUE_FULL");
        assert_eq!(TaskError::Shutdown.code(), "ERR_SHUTDOWN");
        assert_eq!(
            TaskError::UnknownJob {
                name: "x".to_string()
            }
            .code(),
            "ERR_UNKNOWN_JOB"
        );
        assert_eq!(
            TaskError::Validation(ConfigError::JobNameTooLong { len: 9, max: 4 }).code(),
            "ERR_VALIDATION"
        );
    }

    #[test]
    fn test_remote_error_cause_chain() {
        let inner = RemoteError::new("disk full").with_name("IoError");
        let outer = RemoteError::new("save failed").with_cause(inner);

        let task_err = TaskError::from_remote(outer);
        let cause = task_err.remote_cause().unwrap();
        assert_eq!(cause.message, "save failed");
        assert_eq!(cause.cause.as_ref().unwrap().name, "IoError");
    }

    #[test]
    fn test_remote_error_drops_structured_properties() {
        let err = RemoteError::new("boom")
            .with_property("line", serde_json::json!(42))
            .with_property("nested", serde_json::json!({"a": 1}));

        assert_eq!(err.properties.get("line"), Some(&serde_json::json!(42)));
        assert!(!err.properties.contains_key("nested"));
    }

    #[test]
    fn test_remote_error_serialization_round_trip() {
        let err = RemoteError::new("outer")
            .with_name("Aggregate")
            .with_errors(vec![RemoteError::new("a"), RemoteError::new("b")]);

        let json = serde_json::to_string(&err).unwrap();
        let parsed: RemoteError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, parsed);
    }
}
