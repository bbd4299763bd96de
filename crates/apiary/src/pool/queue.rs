//! Priority queue of tasks waiting for a worker
//!
//! Waiters park on a oneshot channel; a released worker is handed directly to
//! the oldest waiter of the highest non-empty priority band. Dropping a
//! waiter's sender (queue drain on shutdown) surfaces as a recv error on the
//! awaiting side.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::Lease;

/// Scheduling priority for queued tasks.
///
/// Priorities only order the wait queue; once a task holds a worker it runs
/// to completion regardless of band. Ordering is strict: a steady stream of
/// high-priority tasks starves the lower bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Default)]
pub(crate) struct WaitQueue {
    high: VecDeque<oneshot::Sender<Lease>>,
    normal: VecDeque<oneshot::Sender<Lease>>,
    low: VecDeque<oneshot::Sender<Lease>>,
}

impl WaitQueue {
    pub(crate) fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    /// (high, normal, low) depths.
    pub(crate) fn band_depths(&self) -> (usize, usize, usize) {
        (self.high.len(), self.normal.len(), self.low.len())
    }

    pub(crate) fn push(&mut self, priority: Priority) -> oneshot::Receiver<Lease> {
        let (tx, rx) = oneshot::channel();
        match priority {
            Priority::High => self.high.push_back(tx),
            Priority::Normal => self.normal.push_back(tx),
            Priority::Low => self.low.push_back(tx),
        }
        rx
    }

    /// Next waiter in priority order, skipping any whose receiver was
    /// dropped (caller gave up while queued).
    pub(crate) fn pop_live(&mut self) -> Option<oneshot::Sender<Lease>> {
        for band in [&mut self.high, &mut self.normal, &mut self.low] {
            while let Some(tx) = band.pop_front() {
                if !tx.is_closed() {
                    return Some(tx);
                }
            }
        }
        None
    }

    /// Drop every waiter. Their receivers error out immediately.
    pub(crate) fn drain(&mut self) {
        self.high.clear();
        self.normal.clear();
        self.low.clear();
    }
}
