//! Store boundary: the abstract data store and an in-memory reference
//! implementation.
//!
//! The engine owns no persisted state; the store behind [`DataStore`] is
//! the sole system of record. Rows cross the boundary as raw JSON and are
//! validated into typed rows here; rows that fail validation are
//! quarantined (logged and dropped), never propagated.

use crate::error::{Result, SyncError};
use crate::feed::{ChangeEvent, SubscriptionManager};
use crate::types::{Query, Row, RowId, Table, Timestamp};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// A patch applied to one row.
///
/// Soft deletion and restore are updates of the `deleted_at` sentinel;
/// there is no separate write path for them.
#[derive(Clone, Debug)]
pub enum Patch {
    SoftDelete { deleted_at: Timestamp },
    Restore,
    Fields(serde_json::Map<String, Value>),
}

/// The remote system of record, reduced to the operations this engine uses.
///
/// `list`, `update` and `delete` are the engine's suspension points.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Fetch the raw rows of `table` matching `query`, in query order.
    async fn list(&self, table: Table, query: &Query) -> Result<Vec<Value>>;

    /// Apply `patch` to one row.
    async fn update(&self, table: Table, id: &RowId, patch: Patch) -> Result<()>;

    /// Remove one row permanently. Removing an absent row is a no-op.
    async fn delete(&self, table: Table, id: &RowId) -> Result<()>;
}

/// Decode raw store rows into typed rows, quarantining the ones that fail
/// validation. Returns the surviving rows and the number rejected.
pub fn decode_rows(table: Table, values: Vec<Value>) -> (Vec<Row>, usize) {
    let mut rows = Vec::with_capacity(values.len());
    let mut rejected = 0;
    for value in values {
        match Row::from_value(table, value) {
            Ok(row) if !row.id().as_str().is_empty() => rows.push(row),
            Ok(_) => {
                rejected += 1;
                warn!(table = %table, "quarantined row with empty id");
            }
            Err(err) => {
                rejected += 1;
                warn!(table = %table, error = %err, "quarantined invalid row");
            }
        }
    }
    (rows, rejected)
}

/// In-memory store for tests and local embedding.
///
/// When wired to a [`SubscriptionManager`], every effective write emits
/// the corresponding change event, standing in for the remote store's
/// change feed (including the echo of the client's own writes).
pub struct MemStore {
    tables: RwLock<HashMap<Table, BTreeMap<RowId, Value>>>,
    feed: RwLock<Option<Arc<SubscriptionManager>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            feed: RwLock::new(None),
        }
    }

    /// Wire a subscription manager to receive post-write change events.
    pub fn attach_feed(&self, feed: Arc<SubscriptionManager>) {
        *self.feed.write() = Some(feed);
    }

    fn emit(&self, event: ChangeEvent) {
        if let Some(feed) = self.feed.read().as_ref() {
            feed.dispatch(&event);
        }
    }

    /// Insert or replace a row, emitting an insert or update event.
    ///
    /// This is the external-writer surface: tests use it to simulate
    /// other clients mutating the remote store.
    pub fn put(&self, table: Table, value: Value) -> Result<RowId> {
        let row = Row::from_value(table, value.clone()).map_err(|e| SyncError::InvalidRow {
            table,
            reason: e.to_string(),
        })?;
        let id = row.id().clone();

        let previous = self
            .tables
            .write()
            .entry(table)
            .or_default()
            .insert(id.clone(), value);

        match previous.and_then(|v| Row::from_value(table, v).ok()) {
            Some(before) => self.emit(ChangeEvent::update(before, row)),
            None => self.emit(ChangeEvent::insert(row)),
        }
        Ok(id)
    }

    /// Number of rows currently stored in `table`.
    pub fn len(&self, table: Table) -> usize {
        self.tables.read().get(&table).map_or(0, BTreeMap::len)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemStore {
    async fn list(&self, table: Table, query: &Query) -> Result<Vec<Value>> {
        let tables = self.tables.read();
        let Some(rows) = tables.get(&table) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(Row, Value)> = rows
            .values()
            .filter_map(|value| {
                Row::from_value(table, value.clone())
                    .ok()
                    .map(|row| (row, value.clone()))
            })
            .filter(|(row, _)| query.matches(row))
            .collect();
        matched.sort_by(|(a, _), (b, _)| query.compare(a, b));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched.into_iter().map(|(_, value)| value).collect())
    }

    async fn update(&self, table: Table, id: &RowId, patch: Patch) -> Result<()> {
        let (before, after) = {
            let mut tables = self.tables.write();
            let rows = tables.entry(table).or_default();
            let Some(value) = rows.get_mut(id) else {
                return Err(SyncError::RowNotFound {
                    table,
                    id: id.clone(),
                });
            };
            let before = value.clone();

            match &patch {
                Patch::SoftDelete { deleted_at } => {
                    // Idempotent: a repeated soft delete keeps the
                    // original stamp and emits nothing.
                    let already = value.get("deleted_at").map_or(false, |v| !v.is_null());
                    if already {
                        return Ok(());
                    }
                    value["deleted_at"] = Value::from(deleted_at.0);
                }
                Patch::Restore => {
                    let live = value.get("deleted_at").map_or(true, Value::is_null);
                    if live {
                        return Ok(());
                    }
                    value["deleted_at"] = Value::Null;
                }
                Patch::Fields(fields) => {
                    let mut patched = value.clone();
                    for (field, new_value) in fields {
                        if field == "id" {
                            return Err(SyncError::WriteRejected("id is immutable".into()));
                        }
                        patched[field] = new_value.clone();
                    }
                    if let Err(err) = Row::from_value(table, patched.clone()) {
                        return Err(SyncError::WriteRejected(format!(
                            "patched row failed validation: {err}"
                        )));
                    }
                    *value = patched;
                }
            }
            (before, value.clone())
        };

        if let (Ok(before), Ok(after)) = (
            Row::from_value(table, before),
            Row::from_value(table, after),
        ) {
            self.emit(ChangeEvent::update(before, after));
        }
        Ok(())
    }

    async fn delete(&self, table: Table, id: &RowId) -> Result<()> {
        let removed = self
            .tables
            .write()
            .get_mut(&table)
            .and_then(|rows| rows.remove(id));
        if let Some(row) = removed.and_then(|v| Row::from_value(table, v).ok()) {
            self.emit(ChangeEvent::delete(row));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Order, OfferStatus, RowFilter, SortKey};
    use serde_json::json;

    fn offer_value(id: &str, title: &str, status: &str, amount: i64, created: i64) -> Value {
        json!({
            "id": id,
            "customer_id": "c1",
            "title": title,
            "status": status,
            "amount_cents": amount,
            "created_at": created,
        })
    }

    #[tokio::test]
    async fn test_list_applies_filter_sort_and_limit() {
        let store = MemStore::new();
        store
            .put(Table::Offers, offer_value("o1", "Alpha", "active", 300, 1))
            .unwrap();
        store
            .put(Table::Offers, offer_value("o2", "Beta", "inactive", 100, 2))
            .unwrap();
        store
            .put(Table::Offers, offer_value("o3", "Gamma", "active", 200, 3))
            .unwrap();

        let query = Query {
            filter: RowFilter::offers_with_status(OfferStatus::Active),
            order: Order {
                key: SortKey::Amount,
                direction: Direction::Descending,
            },
            ..Default::default()
        };
        let values = store.list(Table::Offers, &query).await.unwrap();
        let (rows, rejected) = decode_rows(Table::Offers, values);
        assert_eq!(rejected, 0);
        let ids: Vec<_> = rows.iter().map(|r| r.id().as_str().to_string()).collect();
        assert_eq!(ids, vec!["o1", "o3"]);

        let limited = Query {
            limit: Some(1),
            ..query
        };
        let values = store.list(Table::Offers, &limited).await.unwrap();
        assert_eq!(values.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let store = MemStore::new();
        let id = store
            .put(Table::Offers, offer_value("o1", "Alpha", "active", 100, 1))
            .unwrap();

        store
            .update(
                Table::Offers,
                &id,
                Patch::SoftDelete {
                    deleted_at: Timestamp(42),
                },
            )
            .await
            .unwrap();
        // Second delete succeeds and keeps the original stamp.
        store
            .update(
                Table::Offers,
                &id,
                Patch::SoftDelete {
                    deleted_at: Timestamp(99),
                },
            )
            .await
            .unwrap();

        let values = store
            .list(
                Table::Offers,
                &Query {
                    filter: RowFilter::deleted(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(values[0]["deleted_at"], json!(42));
    }

    #[tokio::test]
    async fn test_restore_of_live_row_is_noop() {
        let store = MemStore::new();
        let id = store
            .put(Table::Offers, offer_value("o1", "Alpha", "active", 100, 1))
            .unwrap();

        store
            .update(Table::Offers, &id, Patch::Restore)
            .await
            .unwrap();
        assert_eq!(store.len(Table::Offers), 1);
    }

    #[tokio::test]
    async fn test_update_missing_row_errors() {
        let store = MemStore::new();
        let result = store
            .update(
                Table::Offers,
                &"ghost".into(),
                Patch::SoftDelete {
                    deleted_at: Timestamp(1),
                },
            )
            .await;
        assert!(matches!(result, Err(SyncError::RowNotFound { .. })));
    }

    #[tokio::test]
    async fn test_fields_patch_validates_result() {
        let store = MemStore::new();
        let id = store
            .put(Table::Offers, offer_value("o1", "Alpha", "active", 100, 1))
            .unwrap();

        let mut bad = serde_json::Map::new();
        bad.insert("status".into(), json!("exploded"));
        let result = store.update(Table::Offers, &id, Patch::Fields(bad)).await;
        assert!(matches!(result, Err(SyncError::WriteRejected(_))));

        let mut immutable = serde_json::Map::new();
        immutable.insert("id".into(), json!("o2"));
        let result = store
            .update(Table::Offers, &id, Patch::Fields(immutable))
            .await;
        assert!(matches!(result, Err(SyncError::WriteRejected(_))));
    }

    #[test]
    fn test_decode_rows_quarantines_invalid() {
        let values = vec![
            offer_value("o1", "Alpha", "active", 100, 1),
            json!({"id": "o2", "title": "missing fields"}),
            json!({"id": "", "customer_id": "c1", "title": "empty id",
                   "status": "active", "amount_cents": 1, "created_at": 1}),
        ];
        let (rows, rejected) = decode_rows(Table::Offers, values);
        assert_eq!(rows.len(), 1);
        assert_eq!(rejected, 2);
    }
}
