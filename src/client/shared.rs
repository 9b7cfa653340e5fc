//! One upstream subscription broadcast to many listeners.
//!
//! # Lifecycle
//!
//! ```text
//! created ──► listeners added/removed ──► last listener leaves ──► upstream cancelled
//!                                     └─► upstream ends ─────────► listeners closed
//! ```
//!
//! Once the listener set has been emptied or the upstream has ended, the
//! set is sealed and new listeners are rejected with
//! [`Error::SubscriptionClosed`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{ListenerId, SubscriptionKey};
use crate::model::{CancelHandle, Message, Subscription};

// ============================================================================
// Types
// ============================================================================

/// Listener channels; `None` once sealed.
type Listeners = Option<FxHashMap<ListenerId, mpsc::Sender<Message>>>;

// ============================================================================
// SharedSubscription
// ============================================================================

/// A deduplicated upstream subscription.
pub(crate) struct SharedSubscription {
    key: SubscriptionKey,
    listeners: RwLock<Listeners>,
    next_id: AtomicU64,
    upstream: CancelHandle,
    done: CancellationToken,
    capacity: usize,
}

impl fmt::Debug for SharedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSubscription")
            .field("key", &self.key)
            .field("listeners", &self.listener_count())
            .field("done", &self.done.is_cancelled())
            .finish()
    }
}

impl SharedSubscription {
    /// Wraps an upstream whose teardown is `upstream`.
    pub(crate) fn new(key: SubscriptionKey, upstream: CancelHandle, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            key,
            listeners: RwLock::new(Some(FxHashMap::default())),
            next_id: AtomicU64::new(0),
            upstream,
            done: CancellationToken::new(),
            capacity,
        })
    }

    /// Registers a listener with its own bounded channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubscriptionClosed`] if the set is sealed.
    pub(crate) fn add_listener(self: &Arc<Self>) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.capacity);

        let id = {
            let mut guard = self.listeners.write();
            let Some(listeners) = guard.as_mut() else {
                return Err(Error::SubscriptionClosed);
            };
            let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            listeners.insert(id, tx);
            id
        };
        trace!(key = %self.key, listener = id.as_u64(), "Listener added");

        let shared = Arc::clone(self);
        let cancel = CancelHandle::new(move || shared.remove_listener(id));
        Ok(Subscription::new(rx, cancel))
    }

    /// Removes a listener. Removing the last one seals the set and cancels
    /// the upstream.
    pub(crate) fn remove_listener(&self, id: ListenerId) {
        {
            let mut guard = self.listeners.write();
            let Some(listeners) = guard.as_mut() else {
                return;
            };
            if listeners.remove(&id).is_none() || !listeners.is_empty() {
                return;
            }
            *guard = None;
        }

        debug!(key = %self.key, "Last listener left, cancelling upstream");
        self.upstream.cancel();
    }

    /// Number of registered listeners.
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.read().as_ref().map_or(0, FxHashMap::len)
    }

    /// Resolves once the fan-out loop has finished.
    pub(crate) async fn wait_done(&self) {
        self.done.cancelled().await;
    }

    /// Forwards every upstream message to every listener.
    ///
    /// Sends block per listener; a listener whose channel closed is removed.
    /// When the upstream ends the set is sealed, every listener channel is
    /// closed, and `on_done` runs before [`wait_done`](Self::wait_done)
    /// resolves.
    pub(crate) async fn fanout(
        self: Arc<Self>,
        mut source: mpsc::Receiver<Message>,
        on_done: impl FnOnce() + Send,
    ) {
        while let Some(message) = source.recv().await {
            let targets: Vec<_> = self
                .listeners
                .read()
                .iter()
                .flatten()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect();

            for (id, tx) in targets {
                if tx.send(message.clone()).await.is_err() {
                    self.remove_listener(id);
                }
            }
        }

        let closed = self.listeners.write().take().map_or(0, |listeners| listeners.len());
        debug!(key = %self.key, listeners = closed, "Upstream ended");

        // Upstream teardown is idempotent; this releases the transport side.
        self.upstream.cancel();
        on_done();
        self.done.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================
