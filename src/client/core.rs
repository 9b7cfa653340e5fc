//! Subscription client with deduplication and fan-out.
//!
//! The [`Client`] is meant to be shared: every call brings its own endpoint,
//! headers and auth through [`Options`]. Calls whose [`SubscriptionKey`]s
//! match share one upstream subscription; each caller still gets its own
//! bounded channel.
//!
//! # Example
//!
//! ```no_run
//! use graphql_subscription_client::{Client, Options, Request};
//!
//! # async fn example() -> graphql_subscription_client::Result<()> {
//! let client = Client::builder().build()?;
//!
//! let request = Request::new("subscription { price(symbol: \"ABC\") }");
//! let options = Options::new("wss://api.example.com/graphql")
//!     .with_header("authorization", "Bearer token")?;
//!
//! let mut sub = client.subscribe(&request, &options).await?;
//! while let Some(message) = sub.recv().await {
//!     if let Some(payload) = &message.payload {
//!         println!("{}", payload.data_str());
//!     }
//!     if message.done {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::identifiers::SubscriptionKey;
use crate::key::subscription_key;
use crate::model::{Options, Request, Subscription, TransportKind};
use crate::transport::{SseTransport, WsTransport};

use super::builder::ClientBuilder;
use super::shared::SharedSubscription;

// ============================================================================
// Types
// ============================================================================

/// Creation slot for one subscription key.
type Slot = Arc<OnceCell<Arc<SharedSubscription>>>;

/// Aggregate counters across both transports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Open WebSocket connections.
    pub ws_conns: usize,
    /// Open SSE streams.
    pub sse_conns: usize,
    /// Distinct upstream subscriptions.
    pub subscriptions: usize,
    /// Listener channels across all upstream subscriptions.
    pub listeners: usize,
}

/// Internal shared state for the client.
pub(crate) struct ClientInner {
    /// Owned token; both transports hold children.
    token: CancellationToken,

    ws: Arc<WsTransport>,

    sse: Arc<SseTransport>,

    config: TransportConfig,

    /// Upstream subscriptions by key.
    shared: Mutex<FxHashMap<SubscriptionKey, Slot>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ============================================================================
// Client
// ============================================================================

/// GraphQL subscription client.
///
/// Cheap to clone; clones share transports and deduplication state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

// ============================================================================
// Client - Display
// ============================================================================

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Constructor
// ============================================================================

impl Client {
    /// Creates a configuration builder for the client.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Assembles a client from validated parts.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn from_parts(
        config: TransportConfig,
        http: reqwest::Client,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let inner = Arc::new(ClientInner {
            ws: WsTransport::new(token.clone(), config),
            sse: SseTransport::new(token.clone(), http, config),
            token,
            config,
            shared: Mutex::new(FxHashMap::default()),
        });

        let weak = Arc::downgrade(&inner);
        let token = inner.token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            if let Some(inner) = weak.upgrade() {
                inner.forget_all();
            }
        });

        debug!("Subscription client initialized");
        Self { inner }
    }
}

// ============================================================================
// Client - Public API
// ============================================================================

impl Client {
    /// Creates or joins a subscription.
    ///
    /// An identical subscription already running is joined; otherwise a new
    /// upstream is opened over the transport selected by
    /// [`Options::transport`].
    ///
    /// # Errors
    ///
    /// - [`Error::ClientClosed`] if the client is closed
    /// - Dial, handshake and HTTP errors from the transport
    /// - [`Error::SubscriptionClosed`] if the joined subscription tore down
    ///   twice in a row while joining
    pub async fn subscribe(&self, request: &Request, options: &Options) -> Result<Subscription> {
        let key = subscription_key(options, request);
        let mut retried = false;

        loop {
            let (shared, created) = self.shared_for(key, request, options).await?;
            if let Some(subscription) = created {
                return Ok(subscription);
            }

            match shared.add_listener() {
                Err(Error::SubscriptionClosed) if !retried => {
                    // Joined a subscription that was tearing down.
                    debug!(%key, "Shared subscription closed while joining, retrying");
                    self.inner.forget(key, &shared);
                    retried = true;
                }
                result => return result,
            }
        }
    }

    /// Closes every subscription and both transports.
    ///
    /// Returns once every fan-out has delivered its last message, or after
    /// the write timeout. The parent token passed to the builder is left
    /// untouched.
    pub async fn close(&self) {
        info!("Closing subscription client");
        self.inner.token.cancel();
        let pending = self.inner.forget_all();

        self.inner.ws.close().await;
        self.inner.sse.close();

        let drained = join_all(pending.iter().map(|shared| shared.wait_done()));
        if timeout(self.inner.config.write_timeout, drained).await.is_err() {
            warn!(subscriptions = pending.len(), "Listeners did not drain before close returned");
        }
    }

    /// Returns `true` once closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Returns aggregate counters.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let (subscriptions, listeners) = {
            let shared = self.inner.shared.lock();
            let live = shared.values().filter_map(|slot| slot.get());
            live.fold((0, 0), |(subs, listeners), sub| {
                (subs + 1, listeners + sub.listener_count())
            })
        };

        Stats {
            ws_conns: self.inner.ws.conn_count(),
            sse_conns: self.inner.sse.conn_count(),
            subscriptions,
            listeners,
        }
    }

    /// Returns the transport configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }
}

// ============================================================================
// Client - Deduplication
// ============================================================================

impl Client {
    /// Returns the shared subscription for `key`, opening it if needed.
    ///
    /// Concurrent callers for the same key wait on one creation. The
    /// creating caller also receives its listener, registered before the
    /// fan-out starts so it sees the first upstream message.
    async fn shared_for(
        &self,
        key: SubscriptionKey,
        request: &Request,
        options: &Options,
    ) -> Result<(Arc<SharedSubscription>, Option<Subscription>)> {
        let slot = {
            let mut shared = self.inner.shared.lock();
            if self.inner.token.is_cancelled() {
                return Err(Error::ClientClosed);
            }
            Arc::clone(shared.entry(key).or_default())
        };

        if let Some(existing) = slot.get() {
            debug!(%key, endpoint = %options.endpoint, "Dedup hit");
            return Ok((Arc::clone(existing), None));
        }

        let mut created = None;
        let first = &mut created;
        let result = slot
            .get_or_try_init(move || self.open(key, request, options, first))
            .await
            .map(Arc::clone);

        match result {
            Ok(shared) => Ok((shared, created)),
            Err(err) => {
                let mut shared = self.inner.shared.lock();
                let stale = shared
                    .get(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && !slot.initialized());
                if stale {
                    shared.remove(&key);
                }
                Err(err)
            }
        }
    }

    /// Opens the upstream, registers the first listener into `first` and
    /// starts the fan-out task.
    async fn open(
        &self,
        key: SubscriptionKey,
        request: &Request,
        options: &Options,
        first: &mut Option<Subscription>,
    ) -> Result<Arc<SharedSubscription>> {
        let upstream = match options.transport {
            TransportKind::Ws => self.inner.ws.subscribe(request, options).await,
            TransportKind::Sse => self.inner.sse.subscribe(request, options).await,
        };
        let upstream = upstream.inspect_err(|err| {
            error!(%key, endpoint = %options.endpoint, error = %err, "Subscribe failed");
        })?;

        debug!(
            %key,
            endpoint = %options.endpoint,
            transport = %options.transport,
            "Upstream subscription created"
        );

        let (source, cancel) = upstream.into_parts();
        let shared = SharedSubscription::new(key, cancel, self.inner.config.channel_capacity);
        *first = Some(shared.add_listener()?);

        let inner = Arc::downgrade(&self.inner);
        let weak = Arc::downgrade(&shared);
        tokio::spawn(Arc::clone(&shared).fanout(source, move || {
            forget_weak(&inner, key, &weak);
        }));

        Ok(shared)
    }
}

// ============================================================================
// ClientInner
// ============================================================================

impl ClientInner {
    /// Drops the entry for `key` if it still holds `shared`.
    fn forget(&self, key: SubscriptionKey, shared: &Arc<SharedSubscription>) {
        let mut map = self.shared.lock();
        let matches = map
            .get(&key)
            .and_then(|slot| slot.get())
            .is_some_and(|current| Arc::ptr_eq(current, shared));
        if matches {
            map.remove(&key);
        }
    }

    /// Drops every entry and returns the live subscriptions. Upstreams end
    /// through their transports.
    fn forget_all(&self) -> Vec<Arc<SharedSubscription>> {
        let live: Vec<_> = self
            .shared
            .lock()
            .drain()
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect();
        if !live.is_empty() {
            debug!(subscriptions = live.len(), "Client shut down");
        }
        live
    }
}

fn forget_weak(inner: &Weak<ClientInner>, key: SubscriptionKey, shared: &Weak<SharedSubscription>) {
    if let (Some(inner), Some(shared)) = (inner.upgrade(), shared.upgrade()) {
        inner.forget(key, &shared);
    }
}

// ============================================================================
// Tests
// ============================================================================
