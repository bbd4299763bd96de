//! Request coalescing
//!
//! Deduplicates concurrent identical tasks: the first caller's execution is
//! stored as a shared future keyed by task fingerprint, and later callers with
//! the same fingerprint await that future instead of dispatching again. The
//! entry is removed when the execution settles, so sequential repeats always
//! run fresh.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::error::TaskError;

type SharedExecution = Shared<BoxFuture<'static, Result<Value, TaskError>>>;

#[derive(Default)]
pub(crate) struct CoalescingTable {
    inflight: DashMap<String, SharedExecution>,
}

impl CoalescingTable {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join an in-flight execution under `key`, or start a new one built by
    /// `make`. Returns the execution plus whether this call joined an
    /// existing one.
    pub(crate) fn join_or_start(
        self: &Arc<Self>,
        key: &str,
        make: impl FnOnce() -> BoxFuture<'static, Result<Value, TaskError>> + Send + 'static,
    ) -> (SharedExecution, bool) {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                // Weak so the stored future cannot keep the table alive.
                let table: Weak<Self> = Arc::downgrade(self);
                let key_owned = key.to_string();
                let execution: SharedExecution = async move {
                    let result = make().await;
                    if let Some(table) = table.upgrade() {
                        table.inflight.remove(&key_owned);
                    }
                    result
                }
                .boxed()
                .shared();
                entry.insert(execution.clone());
                (execution, false)
            }
        }
    }

    /// Drop all in-flight entries. Callers already awaiting a shared
    /// execution keep their handle; future callers start fresh.
    pub(crate) fn clear(&self) {
        self.inflight.clear();
    }

    /// In-flight executions right now.
    pub(crate) fn len(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let table = CoalescingTable::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let make = |runs: Arc<AtomicUsize>| {
            move || {
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    Ok(Value::from(7))
                }
                .boxed()
            }
        };

        let (first, joined_first) = table.join_or_start("k", make(runs.clone()));
        let (second, joined_second) = table.join_or_start("k", make(runs.clone()));
        assert!(!joined_first);
        assert!(joined_second);

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap(), Value::from(7));
        assert_eq!(b.unwrap(), Value::from(7));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entry_removed_after_settlement() {
        let table = CoalescingTable::new();
        let (execution, _) =
            table.join_or_start("k", || async { Ok(Value::Null) }.boxed());
        execution.await.unwrap();
        assert_eq!(table.len(), 0);

        // a later identical call starts a fresh execution
        let (_, joined) = table.join_or_start("k", || async { Ok(Value::Null) }.boxed());
        assert!(!joined);
    }

    #[tokio::test]
    async fn test_failures_are_shared_and_cleared() {
        let table = CoalescingTable::new();
        let (first, _) = table.join_or_start("k", || async { Err(TaskError::Shutdown) }.boxed());
        let (second, joined) = table.join_or_start("k", || async { Ok(Value::Null) }.boxed());
        assert!(joined);

        assert!(matches!(first.await, Err(TaskError::Shutdown)));
        assert!(matches!(second.await, Err(TaskError::Shutdown)));
        assert_eq!(table.len(), 0);
    }
}
