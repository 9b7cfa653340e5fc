//! WebSocket connection pool.
//!
//! Subscriptions with equal [`ConnectionKey`]s share one physical
//! connection. Concurrent callers asking for the same key while it is being
//! dialed wait for that single dial instead of starting their own.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 WsTransport                  │
//! │  conns:                                      │
//! │    key A → WsConnection (sub 1, sub 2, ...)  │
//! │    key B → WsConnection (sub 3)              │
//! │  dialing:                                    │
//! │    key C → watch slot ← waiters              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A connection leaves the pool when its last subscription ends. Cancelling
//! the transport's token closes every connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Request as UpgradeRequest;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::WsConnection;
use crate::config::{TransportConfig, duration_ms};
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionKey, SubscriptionId};
use crate::key::connection_key;
use crate::model::{Options, Request, Subscription};
use crate::protocol::{FrameSink, FrameStream, Protocol, negotiate};

// ============================================================================
// Types
// ============================================================================

/// Outcome of a dial, published to every waiter.
type DialSlot = Option<Result<Arc<WsConnection>>>;

#[derive(Default)]
struct PoolState {
    conns: FxHashMap<ConnectionKey, Arc<WsConnection>>,
    dialing: FxHashMap<ConnectionKey, watch::Receiver<DialSlot>>,
}

// ============================================================================
// WsTransport
// ============================================================================

/// Pool of multiplexed WebSocket connections.
///
/// # Example
///
/// ```ignore
/// let transport = WsTransport::new(token.clone(), TransportConfig::default());
/// let mut sub = transport.subscribe(&request, &options).await?;
/// while let Some(message) = sub.recv().await { /* ... */ }
/// ```
pub struct WsTransport {
    state: Mutex<PoolState>,
    /// Owned token; children are handed to connections.
    token: CancellationToken,
    config: TransportConfig,
    /// Dials attempted so far.
    dials: AtomicUsize,
}

// ============================================================================
// WsTransport - Constructor
// ============================================================================

impl WsTransport {
    /// Creates a transport bound to `token`.
    ///
    /// When `token` is cancelled every tracked connection is closed and
    /// later subscribes fail with [`Error::ClientClosed`]. Must be called
    /// from within a Tokio runtime.
    #[must_use]
    pub fn new(token: CancellationToken, config: TransportConfig) -> Arc<Self> {
        let transport = Arc::new(Self {
            state: Mutex::new(PoolState::default()),
            token: token.child_token(),
            config,
            dials: AtomicUsize::new(0),
        });

        let weak = Arc::downgrade(&transport);
        let token = transport.token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            if let Some(transport) = weak.upgrade() {
                transport.close_all().await;
            }
        });

        transport
    }
}

// ============================================================================
// WsTransport - Public API
// ============================================================================

impl WsTransport {
    /// Subscribes over a pooled connection, dialing one if needed.
    ///
    /// Retries once on a fresh connection if the pooled one closed between
    /// lookup and subscribe.
    ///
    /// # Errors
    ///
    /// - [`Error::ClientClosed`] if the transport is closed
    /// - Dial and handshake errors, shared by every caller waiting on the dial
    pub async fn subscribe(
        self: &Arc<Self>,
        request: &Request,
        options: &Options,
    ) -> Result<Subscription> {
        let key = connection_key(options);
        let mut retried = false;

        loop {
            let conn = self.get_or_dial(key, options).await?;
            match conn.subscribe(SubscriptionId::generate(), request).await {
                Err(Error::ConnectionClosed) if !retried => {
                    debug!(%key, "Pooled connection closed, retrying");
                    self.remove_conn(key, &Arc::downgrade(&conn));
                    retried = true;
                }
                result => return result,
            }
        }
    }

    /// Closes every connection and rejects further subscribes.
    pub async fn close(&self) {
        self.token.cancel();
        self.close_all().await;
    }

    /// Number of pooled connections.
    #[inline]
    #[must_use]
    pub fn conn_count(&self) -> usize {
        self.state.lock().conns.len()
    }

    /// Number of dials attempted since creation.
    #[inline]
    #[must_use]
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }

    /// Total subscriptions across pooled connections.
    #[must_use]
    pub fn sub_count(&self) -> usize {
        self.state
            .lock()
            .conns
            .values()
            .map(|conn| conn.sub_count())
            .sum()
    }

    /// Returns `true` once the transport's token is cancelled.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ============================================================================
// WsTransport - Pooling
// ============================================================================

impl WsTransport {
    /// Returns a live connection for `key`, joining or starting a dial.
    async fn get_or_dial(
        self: &Arc<Self>,
        key: ConnectionKey,
        options: &Options,
    ) -> Result<Arc<WsConnection>> {
        let mut slot = {
            let mut state = self.state.lock();
            if self.token.is_cancelled() {
                return Err(Error::ClientClosed);
            }
            if let Some(conn) = state.conns.get(&key).filter(|conn| !conn.is_closed()) {
                return Ok(Arc::clone(conn));
            }

            match state.dialing.get(&key) {
                Some(slot) => slot.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.dialing.insert(key, rx.clone());

                    // The dial outlives any single caller.
                    let transport = Arc::clone(self);
                    let options = options.clone();
                    tokio::spawn(async move {
                        let result = transport.dial(key, &options).await;
                        let result = transport.register(key, result).await;
                        tx.send_replace(Some(result));
                    });
                    rx
                }
            }
        };

        tokio::select! {
            () = self.token.cancelled() => Err(Error::ClientClosed),
            outcome = slot.wait_for(Option::is_some) => match outcome {
                Ok(published) => published.clone().unwrap_or(Err(Error::ConnectionClosed)),
                Err(_) => Err(Error::ConnectionClosed),
            },
        }
    }

    /// Moves a finished dial from `dialing` into `conns`.
    async fn register(
        &self,
        key: ConnectionKey,
        result: Result<Arc<WsConnection>>,
    ) -> Result<Arc<WsConnection>> {
        let orphan = {
            let mut state = self.state.lock();
            state.dialing.remove(&key);
            match result {
                Ok(conn) if self.token.is_cancelled() => conn,
                Ok(conn) => {
                    state.conns.insert(key, Arc::clone(&conn));
                    return Ok(conn);
                }
                Err(err) => return Err(err),
            }
        };

        // Closed while dialing.
        orphan.shutdown(Error::ClientClosed).await;
        Err(Error::ClientClosed)
    }

    /// Removes `conn` from the pool if it is still the entry for `key`.
    fn remove_conn(&self, key: ConnectionKey, conn: &Weak<WsConnection>) {
        let mut state = self.state.lock();
        let matches = state
            .conns
            .get(&key)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), conn.as_ptr()));
        if matches {
            state.conns.remove(&key);
            debug!(%key, "Connection removed from pool");
        }
    }

    /// Closes every pooled connection.
    ///
    /// The map is emptied under the lock and the connections are closed
    /// after releasing it, since shutdown re-enters the pool through the
    /// connection's empty callback.
    async fn close_all(&self) {
        let conns: Vec<_> = {
            let mut state = self.state.lock();
            state.conns.drain().map(|(_, conn)| conn).collect()
        };

        if conns.is_empty() {
            return;
        }
        info!(connections = conns.len(), "Closing all WebSocket connections");

        join_all(conns.iter().map(|conn| conn.shutdown(Error::ClientClosed))).await;
    }
}

// ============================================================================
// WsTransport - Dialing
// ============================================================================

impl WsTransport {
    /// Opens, negotiates and initializes a new connection.
    async fn dial(self: &Arc<Self>, key: ConnectionKey, options: &Options) -> Result<Arc<WsConnection>> {
        self.dials.fetch_add(1, Ordering::Relaxed);
        let endpoint = options.endpoint.as_str();
        debug!(endpoint, %key, subprotocol = %options.ws_subprotocol, "Dialing");

        let request = upgrade_request(options)?;
        let connect_timeout = self.config.connect_timeout;
        let (socket, response) = timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| Error::timeout(format!("connect to {endpoint}"), duration_ms(connect_timeout)))?
            .map_err(|err| {
                let err = map_connect_error(endpoint, err);
                error!(endpoint, error = %err, "WebSocket upgrade failed");
                err
            })?;

        let accepted = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let (sink, stream) = socket.split();
        let mut sink: FrameSink = Box::pin(sink);
        let mut stream: FrameStream = Box::pin(stream);

        let protocol = match initialize(options, &accepted, &self.config, &mut sink, &mut stream).await {
            Ok(protocol) => protocol,
            Err(err) => {
                error!(endpoint, subprotocol = %accepted, error = %err, "Connection init failed");
                let _ = sink.close().await;
                return Err(err);
            }
        };

        info!(endpoint, subprotocol = %accepted, "WebSocket connected");

        let conn = WsConnection::new(
            protocol,
            sink,
            self.token.child_token(),
            self.config,
            endpoint,
        );

        let transport = Arc::downgrade(self);
        let weak_conn = Arc::downgrade(&conn);
        conn.set_on_empty(move || {
            if let Some(transport) = transport.upgrade() {
                transport.remove_conn(key, &weak_conn);
            }
        });

        tokio::spawn(Arc::clone(&conn).read_loop(stream));
        Ok(conn)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        // Releases the watcher task and every connection.
        self.token.cancel();
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Builds the upgrade request: endpoint, caller headers and offered
/// subprotocols.
fn upgrade_request(options: &Options) -> Result<UpgradeRequest> {
    let mut request = options
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|err| Error::invalid_endpoint(&options.endpoint, err))?;

    let headers = request.headers_mut();
    for (name, value) in &options.headers {
        headers.append(name.clone(), value.clone());
    }

    let offered = options.ws_subprotocol.offered().join(", ");
    let offered = HeaderValue::from_str(&offered)
        .map_err(|err| Error::config(format!("invalid subprotocol header: {err}")))?;
    headers.insert(SEC_WEBSOCKET_PROTOCOL, offered);

    Ok(request)
}

/// Picks the dialect and runs its handshake.
async fn initialize(
    options: &Options,
    accepted: &str,
    config: &TransportConfig,
    sink: &mut FrameSink,
    stream: &mut FrameStream,
) -> Result<Arc<dyn Protocol>> {
    let protocol = negotiate(options.ws_subprotocol, accepted, config)?;
    protocol
        .init(sink, stream, options.init_payload.as_ref())
        .await?;
    Ok(protocol)
}

/// Maps upgrade failures to crate errors.
fn map_connect_error(endpoint: &str, err: WsError) -> Error {
    match err {
        WsError::Http(response) => Error::failed_upgrade(endpoint, response.status().as_u16()),
        WsError::Protocol(ProtocolError::SecWebSocketSubProtocolError(reason)) => {
            Error::invalid_subprotocol(reason.to_string())
        }
        WsError::Url(reason) => Error::invalid_endpoint(endpoint, reason),
        other => other.into(),
    }
}

// ============================================================================
// Tests
// ============================================================================
