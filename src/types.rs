//! Core domain types: tables, rows, and queries.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A remote table watched by this engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Customers,
    Offers,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Customers => "customers",
            Table::Offers => "offers",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of a row, opaque to the engine.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self {
        RowId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", self.0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        RowId(s.to_string())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Lifecycle status of an offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Draft,
    Active,
    Inactive,
}

/// A customer row as validated at the store boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerRow {
    pub id: RowId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub created_at: Timestamp,
    /// Soft-deletion stamp; `None` means the row is live.
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

/// An offer row as validated at the store boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfferRow {
    pub id: RowId,
    pub customer_id: RowId,
    pub title: String,
    pub status: OfferStatus,
    pub amount_cents: i64,
    pub created_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

/// A validated row from either table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum Row {
    Customer(CustomerRow),
    Offer(OfferRow),
}

impl Row {
    /// Decode and validate a raw store row for `table`.
    pub fn from_value(table: Table, value: serde_json::Value) -> Result<Row, serde_json::Error> {
        match table {
            Table::Customers => serde_json::from_value::<CustomerRow>(value).map(Row::Customer),
            Table::Offers => serde_json::from_value::<OfferRow>(value).map(Row::Offer),
        }
    }

    pub fn table(&self) -> Table {
        match self {
            Row::Customer(_) => Table::Customers,
            Row::Offer(_) => Table::Offers,
        }
    }

    pub fn id(&self) -> &RowId {
        match self {
            Row::Customer(c) => &c.id,
            Row::Offer(o) => &o.id,
        }
    }

    pub fn deleted_at(&self) -> Option<Timestamp> {
        match self {
            Row::Customer(c) => c.deleted_at,
            Row::Offer(o) => o.deleted_at,
        }
    }

    pub fn created_at(&self) -> Timestamp {
        match self {
            Row::Customer(c) => c.created_at,
            Row::Offer(o) => o.created_at,
        }
    }

    /// The human-facing label: customer name or offer title.
    pub fn display_name(&self) -> &str {
        match self {
            Row::Customer(c) => &c.name,
            Row::Offer(o) => &o.title,
        }
    }

    /// Monetary amount; customers sort as zero.
    pub fn amount_cents(&self) -> i64 {
        match self {
            Row::Customer(_) => 0,
            Row::Offer(o) => o.amount_cents,
        }
    }
}

/// Which deletion states a query or subscription is interested in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeletionFilter {
    /// Only rows without a deletion stamp.
    #[default]
    LiveOnly,
    /// Only soft-deleted rows (trash views).
    DeletedOnly,
    /// Everything.
    All,
}

/// Row-level criteria, applied both to fetches and to feed routing.
///
/// Criteria that do not apply to a row's table (e.g. `status` on a
/// customer) leave that row unconstrained.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowFilter {
    /// Offers only: restrict to one status.
    pub status: Option<OfferStatus>,
    /// Offers only: restrict to one customer's rows.
    pub customer: Option<RowId>,
    pub deletion: DeletionFilter,
}

impl RowFilter {
    /// Live offers with the given status.
    pub fn offers_with_status(status: OfferStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Live offers belonging to one customer.
    pub fn offers_of(customer: RowId) -> Self {
        Self {
            customer: Some(customer),
            ..Default::default()
        }
    }

    /// Soft-deleted rows only.
    pub fn deleted() -> Self {
        Self {
            deletion: DeletionFilter::DeletedOnly,
            ..Default::default()
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self.deletion {
            DeletionFilter::LiveOnly => {
                if row.deleted_at().is_some() {
                    return false;
                }
            }
            DeletionFilter::DeletedOnly => {
                if row.deleted_at().is_none() {
                    return false;
                }
            }
            DeletionFilter::All => {}
        }

        if let Some(status) = self.status {
            if let Row::Offer(offer) = row {
                if offer.status != status {
                    return false;
                }
            }
        }

        if let Some(ref customer) = self.customer {
            if let Row::Offer(offer) = row {
                if &offer.customer_id != customer {
                    return false;
                }
            }
        }

        true
    }
}

/// Sort key for a watched collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    CreatedAt,
    /// Customer name or offer title.
    Name,
    Amount,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Order {
    pub key: SortKey,
    pub direction: Direction,
}

/// Query defining a watched collection's visible slice of one table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filter: RowFilter,
    pub order: Order,
    /// Case-insensitive substring match on name/title/email.
    pub search: Option<String>,
    pub limit: Option<usize>,
}

impl Query {
    /// Whether `row` belongs to this query's result set.
    pub fn matches(&self, row: &Row) -> bool {
        if !self.filter.matches(row) {
            return false;
        }
        match &self.search {
            None => true,
            Some(term) => {
                let term = term.to_lowercase();
                let mut haystack = row.display_name().to_lowercase();
                if let Row::Customer(c) = row {
                    if let Some(email) = &c.email {
                        haystack.push(' ');
                        haystack.push_str(&email.to_lowercase());
                    }
                }
                haystack.contains(&term)
            }
        }
    }

    /// Total order over rows for this query; ties break on id so results
    /// are stable across refetches.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ord = match self.order.key {
            SortKey::CreatedAt => a.created_at().cmp(&b.created_at()),
            SortKey::Name => a.display_name().cmp(b.display_name()),
            SortKey::Amount => a.amount_cents().cmp(&b.amount_cents()),
        };
        let ord = ord.then_with(|| a.id().cmp(b.id()));
        match self.order.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }
}
