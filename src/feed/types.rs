//! Change-feed event types and subscription handles.

use crate::types::{Row, Table, Timestamp};
use serde::{Deserialize, Serialize};

/// A single change observed on a remote table.
///
/// The closed variant set lets consumers match exhaustively instead of
/// probing optional fields. Payloads may be partial or denormalized on
/// real transports; consumers refetch rather than render them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    Insert { row: Row },
    Update { before: Row, after: Row },
    Delete { row: Row },
}

impl Change {
    /// The latest known shape of the affected row, used for filter routing.
    pub fn current_row(&self) -> &Row {
        match self {
            Change::Insert { row } => row,
            Change::Update { after, .. } => after,
            Change::Delete { row } => row,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Change::Insert { .. } => "insert",
            Change::Update { .. } => "update",
            Change::Delete { .. } => "delete",
        }
    }
}

/// One notification from the change feed. Consumed once, never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub change: Change,
    pub delivered_at: Timestamp,
}

impl ChangeEvent {
    pub fn insert(row: Row) -> Self {
        Self {
            table: row.table(),
            change: Change::Insert { row },
            delivered_at: Timestamp::now(),
        }
    }

    pub fn update(before: Row, after: Row) -> Self {
        Self {
            table: after.table(),
            change: Change::Update { before, after },
            delivered_at: Timestamp::now(),
        }
    }

    pub fn delete(row: Row) -> Self {
        Self {
            table: row.table(),
            change: Change::Delete { row },
            delivered_at: Timestamp::now(),
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Identifier of an underlying transport channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Handle returned by `subscribe`; pass back to `unsubscribe` on teardown.
#[derive(Clone, Copy, Debug)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
}
