//! # Echoview
//!
//! A real-time reconciliation engine for client-held business data
//! (customers and their offers) tracking a remote store that emits change
//! notifications over a persistent subscription channel.
//!
//! ## Core Concepts
//!
//! - **Watched collections**: query-defined live views over one table,
//!   re-derived by refetch whenever the change feed reports a write,
//!   never by merging event payloads.
//! - **Coalescing**: a burst of events within one scheduling tick costs
//!   exactly one refetch.
//! - **Supersession**: refetches are sequence-tagged and applied
//!   last-issued-wins; an out-of-order completion never shows stale data.
//! - **Write-then-wait-for-echo**: mutations go to the store and come
//!   back through the feed; nothing is spliced into collections locally.
//! - **Rate limiting**: a fixed-window governor with a bounded bucket
//!   cache protects write-heavy reporting endpoints.
//!
//! ## Example
//!
//! ```ignore
//! use echoview::{
//!     MemStore, NullTransport, Query, Reconciler, SubscriptionManager, Table,
//! };
//! use std::sync::Arc;
//!
//! let feed = Arc::new(SubscriptionManager::new(Arc::new(NullTransport::new())));
//! let store = Arc::new(MemStore::new());
//! store.attach_feed(Arc::clone(&feed));
//!
//! let reconciler = Reconciler::new(store.clone(), feed.clone());
//! let mut offers = reconciler.watch(Table::Offers, Query::default()).await?;
//!
//! offers.changed().await?;
//! for row in offers.rows() {
//!     println!("{}", row.display_name());
//! }
//! offers.unwatch();
//! ```

pub mod error;
pub mod feed;
pub mod limiter;
pub mod mutation;
pub mod reconcile;
pub mod store;
pub mod types;

// Re-exports
pub use error::{Result, SyncError};
pub use feed::{
    Change, ChangeEvent, ChannelId, EventCallback, FeedTransport, NullTransport,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use limiter::{
    RateDecision, RateLimiter, RateLimiterConfig, LIMIT_HEADER, REMAINING_HEADER,
};
pub use mutation::{MutationCoordinator, MutationIntent, MutationKind, TransientUiState};
pub use reconcile::{CollectionHandle, CollectionSnapshot, Reconciler};
pub use store::{decode_rows, DataStore, MemStore, Patch};
pub use types::*;
