//! Change-feed subscriptions: channel lifecycle and event routing.
//!
//! The manager owns one multiplexed transport channel per distinct table
//! set and routes each inbound [`ChangeEvent`] to the callbacks registered
//! for its table (and row filter, if declared).
//!
//! Delivery is best effort by design: the transport may drop or reorder
//! notifications, and consumers re-derive truth from the store rather
//! than trusting deltas.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new(Arc::new(NullTransport::new()));
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let handle = manager
//!     .subscribe(vec![Table::Offers], None, Arc::new(move |_event| {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     }))
//!     .await?;
//!
//! // ... transport pushes events through manager.dispatch(&event) ...
//!
//! manager.unsubscribe(&handle); // no delivery after this returns
//! ```

mod manager;
mod types;

pub use manager::{EventCallback, FeedTransport, NullTransport, SubscriptionManager};
pub use types::{Change, ChangeEvent, ChannelId, SubscriptionHandle, SubscriptionId};
