//! Pending event queue and dead-letter records.
//!
//! Events wait here until processed. A failed event goes back in with a
//! later `next_attempt_ms`; events whose time has not come are skipped by
//! [`PendingQueue::take_ready`] and stay queued in their original order.

use std::{collections::VecDeque, sync::Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::ErrorReport,
    event::{HandlerContext, SyncEvent},
};

/// An event waiting to be processed.
#[derive(Clone, Debug)]
pub struct QueuedEvent {
    pub event: SyncEvent,
    pub context: HandlerContext,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Earliest processing time, in milliseconds since the Unix epoch.
    pub next_attempt_ms: i64,
    pub last_error: Option<ErrorReport>,
}

impl QueuedEvent {
    pub fn new(event: SyncEvent, context: HandlerContext, now_ms: i64) -> Self {
        Self {
            event,
            context,
            attempts: 0,
            next_attempt_ms: now_ms,
            last_error: None,
        }
    }
}

/// An event that used up its attempt budget.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub event: SyncEvent,
    #[serde(skip)]
    pub context: HandlerContext,
    pub attempts: u32,
    pub error: ErrorReport,
    pub dead_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Mutex<VecDeque<QueuedEvent>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: QueuedEvent) {
        self.entries.lock().unwrap().push_back(entry);
    }

    /// Remove and return every entry due at `now_ms`, oldest first.
    pub fn take_ready(&self, now_ms: i64) -> Vec<QueuedEvent> {
        let mut entries = self.entries.lock().unwrap();
        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = entries
            .drain(..)
            .partition(|entry| entry.next_attempt_ms <= now_ms);
        *entries = waiting;
        ready.into()
    }

    /// Earliest `next_attempt_ms` among entries waiting to be retried.
    ///
    /// Entries that have not failed yet wait for the next cycle instead.
    pub fn next_retry_ms(&self) -> Option<i64> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.attempts > 0)
            .map(|entry| entry.next_attempt_ms)
            .min()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
