//! Watched collection state and the handle vended to consumers.

use crate::error::{Result, SyncError};
use crate::feed::{SubscriptionHandle, SubscriptionManager};
use crate::types::{Query, Row, Table};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::warn;

/// Point-in-time view of a watched collection.
#[derive(Clone, Debug, Default)]
pub struct CollectionSnapshot {
    /// Rows of the highest-sequence fetch applied so far.
    pub rows: Vec<Row>,
    /// True until the first fetch for the current query completes.
    pub loading: bool,
    /// Sequence of the fetch the rows came from.
    pub request_sequence: u64,
    /// True while the latest refetch attempt failed; rows are stale but
    /// still the last valid result.
    pub degraded: bool,
}

/// State shared between the driver task, in-flight fetches and the handle.
pub(crate) struct CollectionShared {
    pub(crate) table: Table,
    /// Current query; every fetch snapshots it at issue time.
    pub(crate) query: Mutex<Query>,
    /// Highest sequence handed to a fetch so far.
    pub(crate) issued_seq: AtomicU64,
    /// Set on `unwatch`; checked before issuing and before applying.
    pub(crate) cancelled: AtomicBool,
    /// Coalescing signal: any number of feed events collapse into one
    /// stored permit until the driver runs.
    pub(crate) wakeup: Notify,
    inner: Mutex<Inner>,
    tx: watch::Sender<CollectionSnapshot>,
}

struct Inner {
    rows: Vec<Row>,
    loading: bool,
    applied_seq: u64,
    degraded: bool,
}

impl CollectionShared {
    pub(crate) fn new(table: Table, query: Query, tx: watch::Sender<CollectionSnapshot>) -> Self {
        Self {
            table,
            query: Mutex::new(query),
            issued_seq: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            wakeup: Notify::new(),
            inner: Mutex::new(Inner {
                rows: Vec::new(),
                loading: true,
                applied_seq: 0,
                degraded: false,
            }),
            tx,
        }
    }

    fn publish(&self, inner: &Inner) {
        let _ = self.tx.send(CollectionSnapshot {
            rows: inner.rows.clone(),
            loading: inner.loading,
            request_sequence: inner.applied_seq,
            degraded: inner.degraded,
        });
    }

    /// Apply a completed fetch. Results older than the last applied
    /// sequence are discarded (last-issued-wins); failures keep the
    /// previous rows visible and only flag degradation.
    pub(crate) fn apply_fetch(&self, seq: u64, outcome: Result<Vec<Row>>) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock();
        if seq <= inner.applied_seq {
            return;
        }
        match outcome {
            Ok(rows) => {
                inner.rows = rows;
                inner.applied_seq = seq;
                inner.loading = false;
                inner.degraded = false;
            }
            Err(err) => {
                warn!(table = %self.table, sequence = seq, error = %err,
                      "refetch failed; keeping previous rows");
                inner.degraded = true;
            }
        }
        self.publish(&inner);
    }

    /// Swap the query and invalidate every fetch issued before the swap:
    /// the applied-sequence floor rises past them, so their results can
    /// no longer land.
    pub(crate) fn replace_query(&self, query: Query) {
        *self.query.lock() = query;
        let floor = self.issued_seq.load(Ordering::SeqCst);
        let mut inner = self.inner.lock();
        if inner.applied_seq < floor {
            inner.applied_seq = floor;
        }
        inner.loading = true;
        self.publish(&inner);
    }
}

/// Live view over one table, owned by the consumer that requested it.
///
/// Dropping the handle does not stop the collection; call
/// [`CollectionHandle::unwatch`] on teardown.
pub struct CollectionHandle {
    pub(crate) shared: Arc<CollectionShared>,
    pub(crate) rx: watch::Receiver<CollectionSnapshot>,
    pub(crate) subscription: SubscriptionHandle,
    pub(crate) feed: Arc<SubscriptionManager>,
}

impl CollectionHandle {
    /// The latest published snapshot.
    pub fn snapshot(&self) -> CollectionSnapshot {
        self.rx.borrow().clone()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rx.borrow().rows.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.rx.borrow().loading
    }

    pub fn request_sequence(&self) -> u64 {
        self.rx.borrow().request_sequence
    }

    pub fn is_degraded(&self) -> bool {
        self.rx.borrow().degraded
    }

    pub fn table(&self) -> Table {
        self.shared.table
    }

    /// Wait until the collection republishes.
    pub async fn changed(&mut self) -> Result<()> {
        self.rx
            .changed()
            .await
            .map_err(|_| SyncError::Transport("collection driver gone".into()))
    }

    /// Replace the query. In-flight fetches issued under the old query
    /// are superseded; a fresh fetch is scheduled immediately.
    pub fn set_query(&self, query: Query) {
        self.shared.replace_query(query);
        self.shared.wakeup.notify_one();
    }

    /// Stop watching: deregisters the feed callback synchronously and
    /// stops the driver; no further refetch is issued or applied.
    /// Idempotent.
    pub fn unwatch(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.feed.unsubscribe(&self.subscription);
        // Wake the driver so it observes the flag and exits.
        self.shared.wakeup.notify_one();
    }
}
