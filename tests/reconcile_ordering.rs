//! Scheduling-order tests: burst coalescing, fetch supersession, and
//! race-free teardown. All run on the current-thread runtime so event
//! delivery and task wakeups interleave deterministically.

use async_trait::async_trait;
use echoview::{
    ChangeEvent, CollectionHandle, CollectionSnapshot, DataStore, MemStore, NullTransport,
    OfferRow, OfferStatus, Patch, Query, Reconciler, Result, Row, RowId, SubscriptionManager,
    Table, Timestamp,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

fn offer_value(id: &str, created: i64) -> Value {
    json!({
        "id": id,
        "customer_id": "c1",
        "title": format!("Offer {id}"),
        "status": "active",
        "amount_cents": 100,
        "created_at": created,
    })
}

fn offer_row(id: &str) -> Row {
    Row::Offer(OfferRow {
        id: id.into(),
        customer_id: "c1".into(),
        title: format!("Offer {id}"),
        status: OfferStatus::Active,
        amount_cents: 100,
        created_at: Timestamp(1),
        deleted_at: None,
    })
}

async fn wait_until(
    handle: &mut CollectionHandle,
    pred: impl Fn(&CollectionSnapshot) -> bool,
) -> CollectionSnapshot {
    for _ in 0..50 {
        let snapshot = handle.snapshot();
        if pred(&snapshot) {
            return snapshot;
        }
        let _ = timeout(Duration::from_millis(100), handle.changed()).await;
    }
    panic!("collection never reached the expected state");
}

/// Store wrapper counting `list` calls.
struct CountingStore {
    inner: MemStore,
    lists: AtomicUsize,
}

impl CountingStore {
    fn new(inner: MemStore) -> Self {
        Self {
            inner,
            lists: AtomicUsize::new(0),
        }
    }

    fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for CountingStore {
    async fn list(&self, table: Table, query: &Query) -> Result<Vec<Value>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(table, query).await
    }

    async fn update(&self, table: Table, id: &RowId, patch: Patch) -> Result<()> {
        self.inner.update(table, id, patch).await
    }

    async fn delete(&self, table: Table, id: &RowId) -> Result<()> {
        self.inner.delete(table, id).await
    }
}

/// Store whose `list` calls block until the test releases them, one gate
/// per call number. Calls without a registered gate resolve immediately
/// with no rows.
struct GatedStore {
    calls: AtomicUsize,
    gates: Mutex<HashMap<usize, oneshot::Receiver<()>>>,
    results: Mutex<HashMap<usize, Vec<Value>>>,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gates: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
        }
    }

    fn stage(&self, call: usize, rows: Vec<Value>) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.gates.lock().insert(call, gate);
        self.results.lock().insert(call, rows);
        release
    }
}

#[async_trait]
impl DataStore for GatedStore {
    async fn list(&self, _table: Table, _query: &Query) -> Result<Vec<Value>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = self.gates.lock().remove(&call);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(self.results.lock().remove(&call).unwrap_or_default())
    }

    async fn update(&self, _table: Table, _id: &RowId, _patch: Patch) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _table: Table, _id: &RowId) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_event_burst_coalesces_into_one_refetch() {
    let feed = Arc::new(SubscriptionManager::new(Arc::new(NullTransport::new())));
    let inner = MemStore::new();
    inner.put(Table::Offers, offer_value("o1", 1)).unwrap();
    let store = Arc::new(CountingStore::new(inner));
    let reconciler = Reconciler::new(
        Arc::clone(&store) as Arc<dyn DataStore>,
        Arc::clone(&feed),
    );

    let mut offers = reconciler
        .watch(Table::Offers, Query::default())
        .await
        .unwrap();
    wait_until(&mut offers, |s| !s.loading).await;
    assert_eq!(store.list_calls(), 1);

    // Five notifications land before the driver task runs once.
    for i in 0..5 {
        feed.dispatch(&ChangeEvent::insert(offer_row(&format!("burst-{i}"))));
    }
    wait_until(&mut offers, |s| s.request_sequence == 2).await;
    assert_eq!(store.list_calls(), 2);

    // A later burst is its own tick and costs one more refetch.
    for i in 0..3 {
        feed.dispatch(&ChangeEvent::insert(offer_row(&format!("late-{i}"))));
    }
    wait_until(&mut offers, |s| s.request_sequence == 3).await;
    assert_eq!(store.list_calls(), 3);
    offers.unwatch();
}

#[tokio::test]
async fn test_stale_completion_is_discarded() {
    let feed = Arc::new(SubscriptionManager::new(Arc::new(NullTransport::new())));
    let store = Arc::new(GatedStore::new());
    let release_1 = store.stage(1, vec![offer_value("old", 1)]);
    let release_2 = store.stage(2, vec![offer_value("old", 1), offer_value("new", 2)]);
    let reconciler = Reconciler::new(
        Arc::clone(&store) as Arc<dyn DataStore>,
        Arc::clone(&feed),
    );

    let mut offers = reconciler
        .watch(Table::Offers, Query::default())
        .await
        .unwrap();
    // Let fetch 1 start and park on its gate.
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    // An event schedules fetch 2 while fetch 1 is still in flight.
    feed.dispatch(&ChangeEvent::insert(offer_row("new")));
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    // Fetch 2 completes first.
    release_2.send(()).unwrap();
    let snapshot = wait_until(&mut offers, |s| s.request_sequence == 2).await;
    assert_eq!(snapshot.rows.len(), 2);

    // Fetch 1 completes late; its result must not overwrite fetch 2's.
    release_1.send(()).unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(offers.request_sequence(), 2);
    assert_eq!(offers.rows().len(), 2);
    offers.unwatch();
}

#[tokio::test]
async fn test_query_change_supersedes_in_flight_fetch() {
    let feed = Arc::new(SubscriptionManager::new(Arc::new(NullTransport::new())));
    let store = Arc::new(GatedStore::new());
    let release_1 = store.stage(1, vec![offer_value("stale", 1)]);
    let release_2 = store.stage(2, vec![offer_value("fresh", 2)]);
    let reconciler = Reconciler::new(
        Arc::clone(&store) as Arc<dyn DataStore>,
        Arc::clone(&feed),
    );

    let mut offers = reconciler
        .watch(Table::Offers, Query::default())
        .await
        .unwrap();
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    offers.set_query(Query {
        search: Some("fresh".into()),
        ..Default::default()
    });

    // The old fetch resolves first, but it was issued under the old
    // query: nothing may land from it.
    release_1.send(()).unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(offers.is_loading());
    assert!(offers.rows().is_empty());

    release_2.send(()).unwrap();
    let snapshot = wait_until(&mut offers, |s| !s.loading).await;
    assert_eq!(snapshot.rows.len(), 1);
    assert_eq!(snapshot.rows[0].id().as_str(), "fresh");
    offers.unwatch();
}

#[tokio::test]
async fn test_unwatch_is_race_free() {
    let feed = Arc::new(SubscriptionManager::new(Arc::new(NullTransport::new())));
    let store = Arc::new(CountingStore::new(MemStore::new()));
    let reconciler = Reconciler::new(
        Arc::clone(&store) as Arc<dyn DataStore>,
        Arc::clone(&feed),
    );

    let mut offers = reconciler
        .watch(Table::Offers, Query::default())
        .await
        .unwrap();
    wait_until(&mut offers, |s| !s.loading).await;
    let calls_before = store.list_calls();

    offers.unwatch();
    // Synchronously delivering a matching event right after unwatch
    // returns must not reach the collection.
    feed.dispatch(&ChangeEvent::insert(offer_row("after")));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.list_calls(), calls_before);
    assert_eq!(offers.request_sequence(), 1);
}
