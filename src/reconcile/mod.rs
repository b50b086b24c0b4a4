//! Collection reconciliation: live, query-defined views kept consistent
//! with the remote store via refetch-on-notification.
//!
//! The reconciler never merges change-event payloads into rows, since events
//! may carry partial or denormalized data. Any event for a watched table
//! schedules a refetch of the whole query instead:
//!
//! - **Coalescing**: a burst of events arriving before the driver task
//!   runs costs exactly one refetch.
//! - **Supersession**: refetches are sequence-tagged and applied
//!   last-issued-wins, so an out-of-order completion never overwrites a
//!   newer result.
//! - **Degradation, not loss**: a failed refetch leaves the previous
//!   valid rows visible and flags the collection as stale.

mod collection;
mod reconciler;

pub use collection::{CollectionHandle, CollectionSnapshot};
pub use reconciler::Reconciler;
