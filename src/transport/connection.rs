//! One physical WebSocket carrying many subscriptions.
//!
//! # Read Loop
//!
//! Each connection runs a single tokio task that:
//!
//! - Reads and decodes frames through its [`Protocol`]
//! - Answers keepalive pings
//! - Routes results to subscribers by subscription id
//! - Unsubscribes ids whose stream ended
//! - Shuts the connection down on any read failure
//!
//! # Locking
//!
//! | Lock | Guards |
//! |------|--------|
//! | `sink` (async mutex) | Frame writes; frames never interleave |
//! | `subs` (read/write lock) | Subscription table |
//! | `on_empty` | The pool callback, taken once |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::SinkExt;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{TransportConfig, duration_ms};
use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::model::{CancelHandle, Message, Request, Subscription};
use crate::protocol::{Frame, FrameSink, FrameStream, Protocol};

// ============================================================================
// Types
// ============================================================================

/// Map of subscription ids to subscriber channels.
type SubscriptionTable = FxHashMap<SubscriptionId, mpsc::Sender<Message>>;

/// Callback fired once when the table becomes empty.
type OnEmpty = Box<dyn FnOnce() + Send>;

/// Frames the connection writes on its own behalf.
enum Outgoing<'a> {
    Subscribe(&'a SubscriptionId, &'a Request),
    Unsubscribe(&'a SubscriptionId),
    Pong,
}

// ============================================================================
// WsConnection
// ============================================================================

/// A multiplexed WebSocket connection.
///
/// Created by [`WsTransport`](super::WsTransport) after a successful
/// handshake. Lives until its subscription table becomes empty, its read
/// loop fails, or its token is cancelled.
pub struct WsConnection {
    /// Negotiated dialect.
    protocol: Arc<dyn Protocol>,
    /// Write half, serialized.
    sink: AsyncMutex<FrameSink>,
    /// Active subscriptions.
    subs: RwLock<SubscriptionTable>,
    /// Set once no new subscriptions are accepted.
    closed: AtomicBool,
    /// Set by the first shutdown.
    shut: AtomicBool,
    /// Stops the read loop.
    token: CancellationToken,
    /// Pool callback.
    on_empty: Mutex<Option<OnEmpty>>,
    config: TransportConfig,
    endpoint: String,
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("endpoint", &self.endpoint)
            .field("subprotocol", &self.protocol.subprotocol())
            .field("subscriptions", &self.sub_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl WsConnection {
    /// Wraps a socket that completed the handshake.
    ///
    /// The read loop is not started; spawn [`WsConnection::read_loop`] with
    /// the matching stream half.
    pub(crate) fn new(
        protocol: Arc<dyn Protocol>,
        sink: FrameSink,
        token: CancellationToken,
        config: TransportConfig,
        endpoint: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            sink: AsyncMutex::new(sink),
            subs: RwLock::new(SubscriptionTable::default()),
            closed: AtomicBool::new(false),
            shut: AtomicBool::new(false),
            token,
            on_empty: Mutex::new(None),
            config,
            endpoint: endpoint.into(),
        })
    }

    /// Installs the callback fired when the table becomes empty.
    pub(crate) fn set_on_empty(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_empty.lock() = Some(Box::new(callback));
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl WsConnection {
    /// Returns `true` once the connection stopped accepting subscriptions.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of active subscriptions.
    #[inline]
    #[must_use]
    pub fn sub_count(&self) -> usize {
        self.subs.read().len()
    }

    /// Negotiated subprotocol.
    #[inline]
    #[must_use]
    pub fn subprotocol(&self) -> &'static str {
        self.protocol.subprotocol()
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

impl WsConnection {
    /// Starts a subscription under `id`.
    ///
    /// The table entry is registered before the frame is written, so a
    /// reply can never arrive for an unknown id.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection no longer accepts subscriptions
    /// - [`Error::SubscriptionExists`] if `id` is already registered
    /// - Write errors, after the registration is rolled back
    pub async fn subscribe(
        self: &Arc<Self>,
        id: SubscriptionId,
        request: &Request,
    ) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        {
            let mut subs = self.subs.write();
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::ConnectionClosed);
            }
            if subs.contains_key(&id) {
                return Err(Error::subscription_exists(id));
            }
            subs.insert(id.clone(), tx);
        }

        if let Err(err) = self.write(Outgoing::Subscribe(&id, request)).await {
            warn!(endpoint = %self.endpoint, subscription_id = %id, error = %err, "Subscribe frame failed");
            if self.remove(&id) == Some(true) {
                self.spawn_teardown(None);
            }
            return Err(err);
        }

        debug!(endpoint = %self.endpoint, subscription_id = %id, "Subscribed");

        let conn = Arc::clone(self);
        let cancel = CancelHandle::new(move || conn.unsubscribe(&id));
        Ok(Subscription::new(rx, cancel))
    }

    /// Stops a subscription.
    ///
    /// Removes the entry (closing the subscriber's channel) at once; the
    /// wire frame is sent in the background on a best-effort basis.
    /// Idempotent.
    pub fn unsubscribe(self: &Arc<Self>, id: &SubscriptionId) {
        let Some(became_empty) = self.remove(id) else {
            return;
        };
        trace!(endpoint = %self.endpoint, subscription_id = %id, became_empty, "Unsubscribed");
        self.spawn_teardown(Some(id.clone()));
    }

    /// Removes a table entry.
    ///
    /// Returns `None` if `id` was not registered, otherwise whether the
    /// table is now empty. An empty table stops accepting subscriptions and
    /// fires the empty callback right away; frame writes and the socket
    /// close follow in the background.
    fn remove(&self, id: &SubscriptionId) -> Option<bool> {
        let empty = {
            let mut subs = self.subs.write();
            subs.remove(id)?;
            let empty = subs.is_empty();
            if empty {
                self.closed.store(true, Ordering::Release);
            }
            empty
        };
        if empty {
            self.fire_on_empty();
        }
        Some(empty)
    }

    /// Sends the unsubscribe frame for `id` (if any), then shuts the
    /// connection down if nothing is left on it.
    fn spawn_teardown(self: &Arc<Self>, id: Option<SubscriptionId>) {
        let Ok(handle) = Handle::try_current() else {
            // Outside a runtime: skip the frame, release synchronously.
            if self.is_drained() {
                self.shut.store(true, Ordering::Release);
                self.token.cancel();
            }
            return;
        };

        let conn = Arc::clone(self);
        handle.spawn(async move {
            if let Some(id) = id {
                conn.send_unsubscribe(&id).await;
            }
            if conn.is_drained() {
                conn.shutdown(Error::ConnectionClosed).await;
            }
        });
    }

    fn is_drained(&self) -> bool {
        self.is_closed() && self.subs.read().is_empty()
    }

    async fn send_unsubscribe(&self, id: &SubscriptionId) {
        if self.token.is_cancelled() {
            return;
        }
        match self.write(Outgoing::Unsubscribe(id)).await {
            Ok(()) => trace!(subscription_id = %id, "Unsubscribe frame sent"),
            Err(err) => {
                warn!(endpoint = %self.endpoint, subscription_id = %id, error = %err, "Unsubscribe frame failed");
            }
        }
    }

    fn fire_on_empty(&self) {
        let callback = self.on_empty.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

impl WsConnection {
    /// Writes one frame under the write lock, bounded by the write timeout.
    async fn write(&self, frame: Outgoing<'_>) -> Result<()> {
        let write_timeout = self.config.write_timeout;
        let attempt = async {
            let mut sink = self.sink.lock().await;
            match frame {
                Outgoing::Subscribe(id, request) => {
                    self.protocol.subscribe(&mut sink, id, request).await
                }
                Outgoing::Unsubscribe(id) => self.protocol.unsubscribe(&mut sink, id).await,
                Outgoing::Pong => self.protocol.pong(&mut sink).await,
            }
        };
        timeout(write_timeout, attempt)
            .await
            .map_err(|_| Error::timeout("frame write", duration_ms(write_timeout)))?
    }
}

// ============================================================================
// Read Loop
// ============================================================================

impl WsConnection {
    /// Reads frames until the socket fails or the token is cancelled, then
    /// shuts the connection down.
    pub(crate) async fn read_loop(self: Arc<Self>, mut stream: FrameStream) {
        let err = loop {
            let frame = tokio::select! {
                () = self.token.cancelled() => break Error::ClientClosed,
                frame = self.protocol.read(&mut stream) => frame,
            };

            match frame {
                Ok(Frame::Ping) => {
                    if let Err(err) = self.write(Outgoing::Pong).await {
                        warn!(endpoint = %self.endpoint, error = %err, "Pong failed");
                    }
                }
                Ok(Frame::Pong) => {}
                Ok(Frame::Error { id: None, error }) => break error,
                Ok(frame) => self.dispatch(frame).await,
                Err(err) => break err,
            }
        };

        drop(stream);
        self.shutdown(err).await;
        debug!(endpoint = %self.endpoint, "Read loop terminated");
    }

    /// Delivers a subscription frame to its subscriber.
    async fn dispatch(self: &Arc<Self>, frame: Frame) {
        let (id, message) = match frame {
            Frame::Data { id, payload } => (id, Message::data(payload)),
            Frame::Error { id: Some(id), error } => (id, Message::error(error)),
            Frame::Complete { id } => (id, Message::complete()),
            Frame::Error { id: None, .. } | Frame::Ping | Frame::Pong => return,
        };

        let tx = self.subs.read().get(&id).cloned();
        let Some(tx) = tx else {
            // Already unsubscribed.
            trace!(endpoint = %self.endpoint, subscription_id = %id, "Frame for unknown subscription dropped");
            return;
        };

        let terminal = message.is_terminal();
        let delivered = tokio::select! {
            () = self.token.cancelled() => return,
            sent = tx.send(message) => sent.is_ok(),
        };
        drop(tx);

        if !delivered || terminal {
            self.unsubscribe(&id);
        }
    }
}

// ============================================================================
// Shutdown
// ============================================================================

impl WsConnection {
    /// Closes the connection, failing every remaining subscriber with `err`.
    ///
    /// Idempotent: only the first call has an effect.
    pub(crate) async fn shutdown(&self, err: Error) {
        if self.shut.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.store(true, Ordering::Release);
        self.token.cancel();

        debug!(endpoint = %self.endpoint, error = %err, "Shutting down connection");

        let write_timeout = self.config.write_timeout;
        if let Ok(mut sink) = timeout(write_timeout, self.sink.lock()).await {
            let sink: &mut FrameSink = &mut sink;
            let _ = timeout(write_timeout, sink.close()).await;
        }

        let subs: Vec<_> = self.subs.write().drain().collect();
        let count = subs.len();
        for (id, tx) in subs {
            let send = tx.send(Message::error(err.clone()));
            if timeout(self.config.shutdown_send_timeout, send).await.is_err() {
                warn!(subscription_id = %id, "Subscriber did not take terminal message");
            }
        }
        if count > 0 {
            debug!(count, "Failed subscriptions on shutdown");
        }

        self.fire_on_empty();
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.shutdown(Error::ConnectionClosed).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
