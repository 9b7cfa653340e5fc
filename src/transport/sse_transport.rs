//! GraphQL over Server-Sent Events.
//!
//! Every subscription issues its own HTTP request; TCP reuse is left to the
//! [`reqwest::Client`] pool. The transport only tracks open streams so it
//! can close them together.
//!
//! # Request Forms
//!
//! | Method | Encoding |
//! |--------|----------|
//! | `POST` (default) | JSON body `{query, variables, operationName, extensions}` |
//! | `GET` | Same fields as query parameters, empty ones omitted |
//!
//! Both send `Accept: text/event-stream` and `Cache-Control: no-cache`.
//! Caller headers are applied last and win.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use reqwest::{RequestBuilder, Response};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::SseConnection;
use crate::config::{TransportConfig, duration_ms};
use crate::error::{Error, Result};
use crate::model::{CancelHandle, Options, Request, SseMethod, Subscription};

// ============================================================================
// Constants
// ============================================================================

const EVENT_STREAM: &str = "text/event-stream";

/// Query parameters owned by the GET encoding.
const OPERATION_PARAMS: [&str; 4] = ["query", "variables", "operationName", "extensions"];

// ============================================================================
// SseTransport
// ============================================================================

/// Server-Sent Events transport.
pub struct SseTransport {
    http: reqwest::Client,
    token: CancellationToken,
    config: TransportConfig,
    conns: Mutex<FxHashMap<u64, Arc<SseConnection>>>,
    next_id: AtomicU64,
}

impl SseTransport {
    /// Creates a transport issuing requests through `http`.
    ///
    /// Cancelling `token` closes every open stream. Must be called from
    /// within a Tokio runtime.
    #[must_use]
    pub fn new(token: CancellationToken, http: reqwest::Client, config: TransportConfig) -> Arc<Self> {
        let transport = Arc::new(Self {
            http,
            token: token.child_token(),
            config,
            conns: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&transport);
        let token = transport.token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            if let Some(transport) = weak.upgrade() {
                transport.close_all();
            }
        });

        transport
    }

    /// Opens a stream for `request`.
    ///
    /// # Errors
    ///
    /// - [`Error::ClientClosed`] if the transport is closed
    /// - [`Error::InvalidEndpoint`] if the endpoint is not a URL
    /// - [`Error::UnexpectedStatus`] on a non-success status
    /// - [`Error::UnexpectedContentType`] if the response is not an event stream
    /// - [`Error::Timeout`] if no response head arrives in time
    pub async fn subscribe(
        self: &Arc<Self>,
        request: &Request,
        options: &Options,
    ) -> Result<Subscription> {
        if self.token.is_cancelled() {
            return Err(Error::ClientClosed);
        }

        let method = options.sse_method.resolve();
        let endpoint = options.endpoint.as_str();
        debug!(endpoint, %method, "Opening SSE stream");

        let builder = build_request(&self.http, method, request, options)?;
        let response = self.send(endpoint, builder).await?;
        let response = self.check_response(endpoint, response).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = SseConnection::new(self.token.child_token(), endpoint);
        self.conns.lock().insert(id, Arc::clone(&conn));

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let weak = Arc::downgrade(self);
        tokio::spawn(Arc::clone(&conn).read_loop(response.bytes_stream(), tx, move || {
            remove_conn(&weak, id);
        }));

        info!(endpoint, "SSE stream opened");

        let weak = Arc::downgrade(self);
        let cancel = CancelHandle::new(move || {
            conn.close();
            remove_conn(&weak, id);
        });
        Ok(Subscription::new(rx, cancel))
    }

    /// Closes every stream and rejects further subscribes.
    pub fn close(&self) {
        self.token.cancel();
        self.close_all();
    }

    /// Number of open streams.
    #[inline]
    #[must_use]
    pub fn conn_count(&self) -> usize {
        self.conns.lock().len()
    }

    fn close_all(&self) {
        let conns: Vec<_> = self.conns.lock().drain().map(|(_, conn)| conn).collect();
        if conns.is_empty() {
            return;
        }
        info!(connections = conns.len(), "Closing all SSE streams");
        for conn in conns {
            conn.close();
        }
    }

    async fn send(&self, endpoint: &str, builder: RequestBuilder) -> Result<Response> {
        let connect_timeout = self.config.connect_timeout;
        let result = tokio::select! {
            () = self.token.cancelled() => return Err(Error::ClientClosed),
            result = timeout(connect_timeout, builder.send()) => result,
        };

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                error!(endpoint, error = %err, "SSE request failed");
                Err(err.into())
            }
            Err(_) => Err(Error::timeout(
                format!("SSE request to {endpoint}"),
                duration_ms(connect_timeout),
            )),
        }
    }

    /// Rejects non-success statuses and non event-stream bodies.
    ///
    /// The body of a rejected response is read under the connect timeout
    /// and the transport token; it is dropped from the error if it does not
    /// arrive in time.
    async fn check_response(&self, endpoint: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                () = self.token.cancelled() => return Err(Error::ClientClosed),
                body = timeout(self.config.connect_timeout, response.text()) => body,
            };
            let body = match body {
                Ok(body) => body.ok().filter(|body| !body.is_empty()),
                Err(_) => {
                    warn!(endpoint, status = status.as_u16(), "SSE error body not received in time");
                    None
                }
            };
            error!(endpoint, status = status.as_u16(), "SSE request rejected");
            return Err(Error::unexpected_status(status.as_u16(), body));
        }

        // A missing content type is tolerated.
        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.to_ascii_lowercase().starts_with(EVENT_STREAM) {
                error!(endpoint, content_type, "SSE response is not an event stream");
                return Err(Error::unexpected_content_type(content_type));
            }
        }

        Ok(response)
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn remove_conn(transport: &Weak<SseTransport>, id: u64) {
    if let Some(transport) = transport.upgrade() {
        transport.conns.lock().remove(&id);
    }
}

/// Builds the HTTP request for `method`.
fn build_request(
    http: &reqwest::Client,
    method: SseMethod,
    request: &Request,
    options: &Options,
) -> Result<RequestBuilder> {
    let mut url = Url::parse(&options.endpoint)
        .map_err(|err| Error::invalid_endpoint(&options.endpoint, err))?;

    let builder = match method {
        SseMethod::Get => {
            append_query(&mut url, request)?;
            http.get(url)
        }
        SseMethod::Post | SseMethod::Auto => http.post(url).json(request),
    };

    Ok(builder
        .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM))
        .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
        .headers(options.headers.clone()))
}

/// Encodes the operation as query parameters.
///
/// Unrelated parameters already on the endpoint are kept; operation
/// parameters are replaced.
fn append_query(url: &mut Url, request: &Request) -> Result<()> {
    let variables = encode_non_empty(request.variables.as_ref())?;
    let extensions = encode_non_empty(request.extensions.as_ref())?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !OPERATION_PARAMS.contains(&name.as_ref()))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut pairs = url.query_pairs_mut();
    pairs.clear().extend_pairs(kept);
    pairs.append_pair("query", &request.query);
    if let Some(variables) = &variables {
        pairs.append_pair("variables", variables);
    }
    if !request.operation_name.is_empty() {
        pairs.append_pair("operationName", &request.operation_name);
    }
    if let Some(extensions) = &extensions {
        pairs.append_pair("extensions", extensions);
    }
    Ok(())
}

fn encode_non_empty(value: Option<&Value>) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => Ok(Some(serde_json::to_string(value)?)),
    }
}

// ============================================================================
// Tests
// ============================================================================
