//! The reconciler: builds live collections driven by the change feed.

use crate::error::Result;
use crate::feed::{EventCallback, SubscriptionManager};
use crate::store::{decode_rows, DataStore};
use crate::types::{Query, Table};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use super::collection::{CollectionHandle, CollectionShared, CollectionSnapshot};

/// Builds [`CollectionHandle`]s whose contents track the remote store.
pub struct Reconciler {
    store: Arc<dyn DataStore>,
    feed: Arc<SubscriptionManager>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DataStore>, feed: Arc<SubscriptionManager>) -> Self {
        Self { store, feed }
    }

    /// Start watching `table` through `query`.
    ///
    /// Subscribes to the change feed for the table (unfiltered: an update
    /// that moves a row *out* of the query must still trigger a refetch),
    /// issues the initial fetch with sequence 1, and spawns the driver
    /// task that turns each wakeup into exactly one refetch.
    pub async fn watch(&self, table: Table, query: Query) -> Result<CollectionHandle> {
        let (tx, rx) = watch::channel(CollectionSnapshot {
            loading: true,
            ..Default::default()
        });
        let shared = Arc::new(CollectionShared::new(table, query, tx));

        let signal = Arc::clone(&shared);
        let callback: EventCallback = Arc::new(move |_event| {
            signal.wakeup.notify_one();
        });
        let subscription = self.feed.subscribe(vec![table], None, callback).await?;

        issue_refetch(&self.store, &shared);

        let driver_store = Arc::clone(&self.store);
        let driver_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                driver_shared.wakeup.notified().await;
                if driver_shared.cancelled.load(Ordering::SeqCst) {
                    break;
                }
                issue_refetch(&driver_store, &driver_shared);
            }
            debug!(table = %driver_shared.table, "collection driver stopped");
        });

        Ok(CollectionHandle {
            shared,
            rx,
            subscription,
            feed: Arc::clone(&self.feed),
        })
    }
}

/// Issue one sequence-tagged fetch for the collection's current query.
/// The fetch runs as its own task; its completion goes through
/// `apply_fetch`, where stale sequences are discarded.
fn issue_refetch(store: &Arc<dyn DataStore>, shared: &Arc<CollectionShared>) {
    if shared.cancelled.load(Ordering::SeqCst) {
        return;
    }
    let seq = shared.issued_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let query = shared.query.lock().clone();
    let store = Arc::clone(store);
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let outcome = store
            .list(shared.table, &query)
            .await
            .map(|values| decode_rows(shared.table, values).0);
        shared.apply_fetch(seq, outcome);
    });
}
