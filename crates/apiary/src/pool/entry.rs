//! Per-worker bookkeeping

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::RemoteError;
use crate::job::JobInput;

/// Affinity keys remembered per worker before a wholesale clear.
const AFFINITY_CAP: usize = 50;

/// Message delivered to a worker thread's inbox.
pub(crate) enum Envelope {
    Task(TaskEnvelope),
    Chunk(ChunkEnvelope),
    /// Exit after the current task. Sent during shutdown so the thread stops
    /// even while lease clones of its sender are still alive.
    Stop,
}

/// A named-job invocation.
pub(crate) struct TaskEnvelope {
    pub(crate) job: String,
    pub(crate) input: JobInput,
    pub(crate) reply: oneshot::Sender<Result<Value, RemoteError>>,
}

/// An opaque bulk-engine chunk. The closure carries its own typed result
/// channel; the reply here only signals completion (or a panic) so the
/// worker can be released.
pub(crate) struct ChunkEnvelope {
    pub(crate) work: Box<dyn FnOnce() + Send>,
    pub(crate) reply: oneshot::Sender<Result<Value, RemoteError>>,
}

/// A checked-out worker, valid until released or force-terminated.
#[derive(Debug)]
pub(crate) struct Lease {
    pub(crate) worker_id: u64,
    pub(crate) sender: std::sync::mpsc::Sender<Envelope>,
    pub(crate) temporary: bool,
}

/// Controller-side record of a live worker thread.
pub(crate) struct WorkerEntry {
    pub(crate) id: u64,
    pub(crate) sender: std::sync::mpsc::Sender<Envelope>,
    pub(crate) busy: bool,
    pub(crate) temporary: bool,
    pub(crate) tasks_executed: u64,
    pub(crate) failed_tasks: u64,
    pub(crate) total_execution: Duration,
    affinity: HashSet<String>,
    /// Pending idle-eviction timer, armed while parked
    pub(crate) idle_timer: Option<tokio::task::JoinHandle<()>>,
    /// OS thread handle, joined on graceful shutdown
    pub(crate) thread: Option<std::thread::JoinHandle<()>>,
}

impl WorkerEntry {
    pub(crate) fn new(
        id: u64,
        sender: std::sync::mpsc::Sender<Envelope>,
        temporary: bool,
        thread: std::thread::JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            sender,
            busy: true,
            temporary,
            tasks_executed: 0,
            failed_tasks: 0,
            total_execution: Duration::ZERO,
            affinity: HashSet::new(),
            idle_timer: None,
            thread: Some(thread),
        }
    }

    pub(crate) fn lease(&self) -> Lease {
        Lease {
            worker_id: self.id,
            sender: self.sender.clone(),
            temporary: self.temporary,
        }
    }

    /// Fold one finished task into this worker's totals.
    pub(crate) fn record_task(&mut self, elapsed: Duration, failed: bool) {
        self.tasks_executed += 1;
        self.failed_tasks += u64::from(failed);
        self.total_execution += elapsed;
    }

    pub(crate) fn has_affinity(&self, key: &str) -> bool {
        self.affinity.contains(key)
    }

    /// Remember an affinity key. At capacity the whole set is cleared rather
    /// than evicting one entry; stale affinity only costs a cache miss.
    pub(crate) fn record_affinity(&mut self, key: &str) {
        if self.affinity.len() >= AFFINITY_CAP {
            self.affinity.clear();
        }
        self.affinity.insert(key.to_string());
    }

    pub(crate) fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for WorkerEntry {
    fn drop(&mut self) {
        self.cancel_idle_timer();
        // sender drops with the entry; the thread exits after its current
        // task when recv fails
    }
}
