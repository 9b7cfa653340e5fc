//! Per-subscription transport options.
//!
//! [`Options`] are produced by whatever plans the upstream fetch. Besides
//! routing, they define connection identity: endpoint, subprotocol, headers
//! and init payload decide which subscriptions may share a WebSocket.
//!
//! # Example
//!
//! ```ignore
//! use graphql_subscription_client::{Options, TransportKind, WsSubprotocol};
//!
//! let options = Options::new("ws://localhost:4000/graphql")
//!     .with_header("authorization", "Bearer token")?
//!     .with_subprotocol(WsSubprotocol::GraphqlTransportWs);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Wire name of the modern dialect.
pub const GRAPHQL_TRANSPORT_WS: &str = "graphql-transport-ws";

/// Wire name of the legacy dialect.
pub const GRAPHQL_WS: &str = "graphql-ws";

// ============================================================================
// TransportKind
// ============================================================================

/// Which transport carries the subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// WebSocket, multiplexed.
    #[default]
    Ws,
    /// Server-Sent Events, one request per subscription.
    Sse,
}

impl TransportKind {
    /// Returns the lowercase name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// WsSubprotocol
// ============================================================================

/// WebSocket subprotocol preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WsSubprotocol {
    /// Offer both dialects, let the server pick.
    #[default]
    Auto,
    /// Pin the modern `graphql-transport-ws` dialect.
    GraphqlTransportWs,
    /// Pin the legacy `graphql-ws` dialect.
    GraphqlWs,
}

impl WsSubprotocol {
    /// Returns the wire name, or `"auto"`.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::GraphqlTransportWs => GRAPHQL_TRANSPORT_WS,
            Self::GraphqlWs => GRAPHQL_WS,
        }
    }

    /// Subprotocols to offer in `Sec-WebSocket-Protocol`, in preference order.
    #[must_use]
    pub fn offered(&self) -> &'static [&'static str] {
        match self {
            Self::Auto => &[GRAPHQL_TRANSPORT_WS, GRAPHQL_WS],
            Self::GraphqlTransportWs => &[GRAPHQL_TRANSPORT_WS],
            Self::GraphqlWs => &[GRAPHQL_WS],
        }
    }

    /// Maps an accepted subprotocol string to a concrete dialect.
    #[must_use]
    pub fn from_accepted(accepted: &str) -> Option<Self> {
        match accepted {
            GRAPHQL_TRANSPORT_WS => Some(Self::GraphqlTransportWs),
            GRAPHQL_WS => Some(Self::GraphqlWs),
            _ => None,
        }
    }
}

impl fmt::Display for WsSubprotocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SseMethod
// ============================================================================

/// HTTP method for SSE subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SseMethod {
    /// Same as [`SseMethod::Post`].
    #[default]
    Auto,
    /// JSON body, graphql-sse binding.
    Post,
    /// Query parameters.
    Get,
}

impl SseMethod {
    /// Returns the method name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Post => "POST",
            Self::Get => "GET",
        }
    }

    /// Resolves `Auto` to the concrete method.
    #[inline]
    #[must_use]
    pub const fn resolve(self) -> Self {
        match self {
            Self::Auto => Self::Post,
            other => other,
        }
    }
}

impl fmt::Display for SseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Options
// ============================================================================

/// Options for one `subscribe` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    /// Upstream URL (`ws://`, `wss://`, `http://` or `https://`).
    pub endpoint: String,

    /// Headers sent with the upgrade or SSE request.
    pub headers: HeaderMap,

    /// Payload of `connection_init` (WebSocket only).
    pub init_payload: Option<Value>,

    /// Transport selection.
    pub transport: TransportKind,

    /// WebSocket dialect preference.
    pub ws_subprotocol: WsSubprotocol,

    /// SSE method.
    pub sse_method: SseMethod,
}

impl Options {
    /// Creates options for an endpoint with defaults (WebSocket, auto dialect).
    #[inline]
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the name or value is not a valid header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::config(format!("invalid header value for '{name}': {e}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Replaces all headers.
    #[inline]
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the `connection_init` payload.
    #[inline]
    #[must_use]
    pub fn with_init_payload(mut self, payload: Value) -> Self {
        self.init_payload = Some(payload);
        self
    }

    /// Selects the transport.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Selects the WebSocket dialect.
    #[inline]
    #[must_use]
    pub fn with_subprotocol(mut self, subprotocol: WsSubprotocol) -> Self {
        self.ws_subprotocol = subprotocol;
        self
    }

    /// Selects the SSE method.
    #[inline]
    #[must_use]
    pub fn with_sse_method(mut self, method: SseMethod) -> Self {
        self.sse_method = method;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_new_uses_defaults() {
        let options = Options::new("ws://h/graphql");
        assert_eq!(options.endpoint, "ws://h/graphql");
        assert_eq!(options.transport, TransportKind::Ws);
        assert_eq!(options.ws_subprotocol, WsSubprotocol::Auto);
        assert_eq!(options.sse_method, SseMethod::Auto);
        assert!(options.headers.is_empty());
        assert!(options.init_payload.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let options = Options::new("http://h/graphql")
            .with_header("x-token", "abc")
            .unwrap()
            .with_init_payload(json!({ "secret": "token" }))
            .with_transport(TransportKind::Sse)
            .with_sse_method(SseMethod::Get);

        assert_eq!(options.headers.get("x-token").unwrap(), "abc");
        assert_eq!(options.transport, TransportKind::Sse);
        assert_eq!(options.sse_method, SseMethod::Get);
        assert_eq!(options.init_payload, Some(json!({ "secret": "token" })));
    }

    #[test]
    fn test_with_header_rejects_invalid_name() {
        let result = Options::new("ws://h").with_header("bad header", "x");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_offered_subprotocols() {
        assert_eq!(
            WsSubprotocol::Auto.offered(),
            &["graphql-transport-ws", "graphql-ws"]
        );
        assert_eq!(WsSubprotocol::GraphqlWs.offered(), &["graphql-ws"]);
    }

    #[test]
    fn test_from_accepted() {
        assert_eq!(
            WsSubprotocol::from_accepted("graphql-transport-ws"),
            Some(WsSubprotocol::GraphqlTransportWs)
        );
        assert_eq!(
            WsSubprotocol::from_accepted("graphql-ws"),
            Some(WsSubprotocol::GraphqlWs)
        );
        assert_eq!(WsSubprotocol::from_accepted("mqtt"), None);
    }

    #[test]
    fn test_sse_method_resolve() {
        assert_eq!(SseMethod::Auto.resolve(), SseMethod::Post);
        assert_eq!(SseMethod::Get.resolve(), SseMethod::Get);
    }
}
