//! Mutation coordination: write intents and transient UI-state cleanup.
//!
//! The coordinator follows a write-then-wait-for-echo model: every user
//! action becomes exactly one store write, and the resulting membership
//! change reaches watched collections through the change feed, never
//! through a local splice. The one thing cleaned up immediately is
//! transient UI-only state keyed by the entity id, which has no
//! server-side representation, so no echo would ever clear it.

use crate::error::Result;
use crate::store::{DataStore, Patch};
use crate::types::{Row, RowId, Table, Timestamp};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// What a mutation intends to do to its target row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    SoftDelete,
    Restore,
    HardDelete,
    Update,
}

/// A user-issued write intent. Lives only for the duration of the write
/// call and never touches a watched collection directly.
#[derive(Clone, Debug)]
pub struct MutationIntent {
    pub target_id: RowId,
    pub kind: MutationKind,
    pub issued_at: Timestamp,
}

impl MutationIntent {
    fn new(target_id: RowId, kind: MutationKind) -> Self {
        Self {
            target_id,
            kind,
            issued_at: Timestamp::now(),
        }
    }
}

/// Session-local, per-row UI state with no server-side representation:
/// which detail panels are expanded, cached child collections.
///
/// Every change replaces the whole map behind an `Arc`, so a reader
/// holding a snapshot never observes a partially-updated structure and
/// concurrent removals of different ids cannot corrupt each other.
#[derive(Default)]
pub struct TransientUiState {
    expanded: RwLock<Arc<HashMap<RowId, bool>>>,
    children: RwLock<Arc<HashMap<RowId, Vec<Row>>>>,
}

impl TransientUiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, id: &RowId) -> bool {
        self.expanded.read().get(id).copied().unwrap_or(false)
    }

    /// The full expanded-state map as an immutable snapshot.
    pub fn expanded_snapshot(&self) -> Arc<HashMap<RowId, bool>> {
        Arc::clone(&self.expanded.read())
    }

    pub fn set_expanded(&self, id: RowId, expanded: bool) {
        let mut guard = self.expanded.write();
        let mut next = HashMap::clone(&guard);
        if expanded {
            next.insert(id, true);
        } else {
            next.remove(&id);
        }
        *guard = Arc::new(next);
    }

    pub fn cached_children(&self, id: &RowId) -> Option<Vec<Row>> {
        self.children.read().get(id).cloned()
    }

    pub fn cache_children(&self, id: RowId, rows: Vec<Row>) {
        let mut guard = self.children.write();
        let mut next = HashMap::clone(&guard);
        next.insert(id, rows);
        *guard = Arc::new(next);
    }

    /// Drop all transient state for `id`. Absent keys are a no-op, so
    /// concurrent cleanup of the same id is harmless.
    pub fn forget(&self, id: &RowId) {
        Self::remove(&self.expanded, id);
        Self::remove(&self.children, id);
    }

    fn remove<V: Clone>(map: &RwLock<Arc<HashMap<RowId, V>>>, id: &RowId) {
        let mut guard = map.write();
        if !guard.contains_key(id) {
            return;
        }
        let mut next = HashMap::clone(&guard);
        next.remove(id);
        *guard = Arc::new(next);
    }
}

/// Issues store writes for user actions.
///
/// Errors from the store are returned to the caller unchanged: no retry,
/// no suppression. Collection membership is reconciled elsewhere.
pub struct MutationCoordinator {
    store: Arc<dyn DataStore>,
    ui_state: Arc<TransientUiState>,
}

impl MutationCoordinator {
    pub fn new(store: Arc<dyn DataStore>, ui_state: Arc<TransientUiState>) -> Self {
        Self { store, ui_state }
    }

    pub fn ui_state(&self) -> &Arc<TransientUiState> {
        &self.ui_state
    }

    /// Mark the row deleted. Transient state for the row is dropped
    /// immediately, before the write settles and whether or not the echo
    /// ever arrives.
    pub async fn soft_delete(&self, table: Table, id: &RowId) -> Result<()> {
        let intent = MutationIntent::new(id.clone(), MutationKind::SoftDelete);
        self.ui_state.forget(id);
        debug!(table = %table, id = %id, kind = ?intent.kind, "issuing mutation");
        self.store
            .update(
                table,
                id,
                Patch::SoftDelete {
                    deleted_at: intent.issued_at,
                },
            )
            .await
    }

    /// Clear the row's deletion stamp.
    pub async fn restore(&self, table: Table, id: &RowId) -> Result<()> {
        let intent = MutationIntent::new(id.clone(), MutationKind::Restore);
        debug!(table = %table, id = %id, kind = ?intent.kind, "issuing mutation");
        self.store.update(table, id, Patch::Restore).await
    }

    /// Remove the row permanently. Transient state is dropped immediately.
    pub async fn hard_delete(&self, table: Table, id: &RowId) -> Result<()> {
        let intent = MutationIntent::new(id.clone(), MutationKind::HardDelete);
        self.ui_state.forget(id);
        debug!(table = %table, id = %id, kind = ?intent.kind, "issuing mutation");
        self.store.delete(table, id).await
    }

    /// Plain field edit.
    pub async fn update(
        &self,
        table: Table,
        id: &RowId,
        fields: serde_json::Map<String, Value>,
    ) -> Result<()> {
        let intent = MutationIntent::new(id.clone(), MutationKind::Update);
        debug!(table = %table, id = %id, kind = ?intent.kind, "issuing mutation");
        self.store.update(table, id, Patch::Fields(fields)).await
    }
}
