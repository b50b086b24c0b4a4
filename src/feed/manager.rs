//! Subscription manager: transport channel lifecycle and event routing.

use crate::error::Result;
use crate::types::{RowFilter, Table};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{ChangeEvent, ChannelId, SubscriptionHandle, SubscriptionId};

/// Callback invoked inline for each routed event. Must not suspend and
/// must not call back into the manager.
pub type EventCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// The remote transport carrying the change feed.
///
/// Opening and closing channels are suspension points; event delivery
/// into [`SubscriptionManager::dispatch`] is not. Reconnection and
/// backoff policy belong to the transport implementation.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Open a multiplexed channel covering `tables`.
    async fn open(&self, tables: &[Table]) -> Result<ChannelId>;

    /// Close a previously opened channel.
    async fn close(&self, channel: ChannelId) -> Result<()>;
}

/// Transport that hands out channel ids without any real connection.
/// Useful for tests and for embedding the engine against a local store.
pub struct NullTransport {
    next_channel: AtomicU64,
}

impl NullTransport {
    pub fn new() -> Self {
        Self {
            next_channel: AtomicU64::new(1),
        }
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedTransport for NullTransport {
    async fn open(&self, _tables: &[Table]) -> Result<ChannelId> {
        Ok(ChannelId(self.next_channel.fetch_add(1, Ordering::SeqCst)))
    }

    async fn close(&self, _channel: ChannelId) -> Result<()> {
        Ok(())
    }
}

/// Internal watcher state.
struct Watcher {
    tables: Vec<Table>,
    filter: Option<RowFilter>,
    callback: EventCallback,
    /// Which channel entry this watcher holds a reference on.
    channel_key: Vec<Table>,
}

impl Watcher {
    fn matches(&self, event: &ChangeEvent) -> bool {
        if !self.tables.contains(&event.table) {
            return false;
        }
        match &self.filter {
            Some(filter) => filter.matches(event.change.current_row()),
            None => true,
        }
    }
}

/// An open transport channel shared by every watcher of one table set.
struct Channel {
    id: ChannelId,
    watchers: usize,
}

/// Routes change-feed events to registered watchers and keeps exactly one
/// transport channel open per distinct table-set key.
pub struct SubscriptionManager {
    transport: Arc<dyn FeedTransport>,
    /// Active watchers by subscription ID.
    watchers: RwLock<HashMap<SubscriptionId, Watcher>>,
    /// Open channels by sorted, deduplicated table set.
    channels: RwLock<HashMap<Vec<Table>, Channel>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn FeedTransport>) -> Self {
        Self {
            transport,
            watchers: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn channel_key(tables: &[Table]) -> Vec<Table> {
        let mut key = tables.to_vec();
        key.sort();
        key.dedup();
        key
    }

    /// Register a watcher for `tables`, opening a transport channel for
    /// the table set if none is open yet. Suspends only while opening.
    ///
    /// A failed open is reported as [`SyncError::Transport`] and is not
    /// retried here.
    ///
    /// [`SyncError::Transport`]: crate::error::SyncError::Transport
    pub async fn subscribe(
        &self,
        tables: Vec<Table>,
        filter: Option<RowFilter>,
        on_event: EventCallback,
    ) -> Result<SubscriptionHandle> {
        let key = Self::channel_key(&tables);

        let joined_existing = {
            let mut channels = self.channels.write();
            match channels.get_mut(&key) {
                Some(channel) => {
                    channel.watchers += 1;
                    true
                }
                None => false,
            }
        };

        if !joined_existing {
            let channel_id = match self.transport.open(&key).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(tables = ?key, error = %err, "change feed channel open failed");
                    return Err(err);
                }
            };

            let mut channels = self.channels.write();
            match channels.get_mut(&key) {
                // Another subscriber opened the same table set while we
                // were suspended; keep theirs, close ours.
                Some(channel) => {
                    channel.watchers += 1;
                    let transport = Arc::clone(&self.transport);
                    tokio::spawn(async move {
                        let _ = transport.close(channel_id).await;
                    });
                }
                None => {
                    channels.insert(
                        key.clone(),
                        Channel {
                            id: channel_id,
                            watchers: 1,
                        },
                    );
                }
            }
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.watchers.write().insert(
            id,
            Watcher {
                tables,
                filter,
                callback: on_event,
                channel_key: key,
            },
        );
        debug!(subscription = id.0, "subscribed");
        Ok(SubscriptionHandle { id })
    }

    /// Deregister a watcher. The callback is removed before this returns,
    /// so no event is delivered for the handle afterward; if this was the
    /// last watcher of its table set, the transport channel is closed on a
    /// background task (must be called within the runtime). Idempotent.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let Some(watcher) = self.watchers.write().remove(&handle.id) else {
            return;
        };
        debug!(subscription = handle.id.0, "unsubscribed");

        let mut channels = self.channels.write();
        let Some(channel) = channels.get_mut(&watcher.channel_key) else {
            return;
        };
        channel.watchers -= 1;
        if channel.watchers == 0 {
            let channel_id = channel.id;
            channels.remove(&watcher.channel_key);
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                if let Err(err) = transport.close(channel_id).await {
                    warn!(channel = channel_id.0, error = %err, "channel close failed");
                }
            });
        }
    }

    /// Route one inbound event to every matching watcher.
    ///
    /// Synchronous and non-suspending: callbacks run inline, in
    /// registration-independent order, while the watcher table is read
    /// locked. A concurrent `unsubscribe` therefore settles strictly
    /// before or strictly after the whole dispatch.
    pub fn dispatch(&self, event: &ChangeEvent) {
        let watchers = self.watchers.read();
        for watcher in watchers.values() {
            if watcher.matches(event) {
                (watcher.callback)(event);
            }
        }
    }

    /// Number of active watchers.
    pub fn subscription_count(&self) -> usize {
        self.watchers.read().len()
    }

    /// Number of open transport channels.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}
