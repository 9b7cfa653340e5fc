//! WebSocket subscription dialects.
//!
//! Two dialects compete for GraphQL over WebSocket. Both are implemented
//! behind the [`Protocol`] trait; the connection and pool layers never
//! branch on which one is in use. The concrete dialect is chosen once per
//! connection by [`negotiate`] from the subprotocol the server accepted.
//!
//! # Handshake
//!
//! ```text
//! client                       server
//!   | -- connection_init ------> |
//!   | <------ ping / ka -------- |   (tolerated, modern answers pong)
//!   | <---- connection_ack ----- |   ready
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Wire envelope, [`Frame`], socket half types |
//! | `graphql_transport_ws` | Modern dialect |
//! | `graphql_ws` | Legacy dialect |

// ============================================================================
// Submodules
// ============================================================================

/// Wire envelope and decoded frames.
pub mod frame;

/// The `graphql-transport-ws` dialect.
pub mod graphql_transport_ws;

/// The legacy `graphql-ws` dialect.
pub mod graphql_ws;

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::model::{Request, WsSubprotocol};

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Frame, FrameSink, FrameStream};
pub use graphql_transport_ws::GraphQLTransportWs;
pub use graphql_ws::GraphQLWs;

// ============================================================================
// Protocol
// ============================================================================

/// One WebSocket subscription dialect.
///
/// Implementations hold no per-connection state: every call receives the
/// socket half it works on. Callers serialize writes.
#[async_trait]
pub trait Protocol: Send + Sync + Debug {
    /// Wire name of the dialect.
    fn subprotocol(&self) -> &'static str;

    /// Runs the `connection_init` / `connection_ack` handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::AckTimeout`] if no ack arrives in time
    /// - [`Error::ConnectionError`] if the server rejects the connection
    /// - [`Error::AckNotReceived`] on any other frame
    async fn init(
        &self,
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        payload: Option<&Value>,
    ) -> Result<()>;

    /// Starts an operation under `id`.
    async fn subscribe(
        &self,
        sink: &mut FrameSink,
        id: &SubscriptionId,
        request: &Request,
    ) -> Result<()>;

    /// Stops the operation `id`.
    async fn unsubscribe(&self, sink: &mut FrameSink, id: &SubscriptionId) -> Result<()>;

    /// Reads and decodes the next frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] when the socket is closed
    /// - [`Error::UnknownMessageType`] or [`Error::Decode`] on bad frames
    async fn read(&self, stream: &mut FrameStream) -> Result<Frame>;

    /// Sends a keepalive request.
    async fn ping(&self, sink: &mut FrameSink) -> Result<()>;

    /// Answers a keepalive request.
    async fn pong(&self, sink: &mut FrameSink) -> Result<()>;
}

// ============================================================================
// Negotiation
// ============================================================================

/// Selects the dialect for an accepted subprotocol.
///
/// # Errors
///
/// Returns [`Error::InvalidSubprotocol`] if the server accepted a
/// subprotocol other than the pinned one, or one this crate does not speak
/// (including none at all).
pub fn negotiate(
    requested: WsSubprotocol,
    accepted: &str,
    config: &TransportConfig,
) -> Result<Arc<dyn Protocol>> {
    if requested != WsSubprotocol::Auto && requested.as_str() != accepted {
        return Err(Error::invalid_subprotocol(accepted));
    }

    match WsSubprotocol::from_accepted(accepted) {
        Some(WsSubprotocol::GraphqlTransportWs) => Ok(Arc::new(
            GraphQLTransportWs::new().with_ack_timeout(config.ack_timeout),
        )),
        Some(WsSubprotocol::GraphqlWs) => Ok(Arc::new(
            GraphQLWs::new().with_ack_timeout(config.ack_timeout),
        )),
        _ => Err(Error::invalid_subprotocol(accepted)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_auto() {
        let config = TransportConfig::default();
        let modern = negotiate(WsSubprotocol::Auto, "graphql-transport-ws", &config).unwrap();
        assert_eq!(modern.subprotocol(), "graphql-transport-ws");

        let legacy = negotiate(WsSubprotocol::Auto, "graphql-ws", &config).unwrap();
        assert_eq!(legacy.subprotocol(), "graphql-ws");
    }

    #[test]
    fn test_negotiate_pinned_mismatch() {
        let config = TransportConfig::default();
        let err = negotiate(WsSubprotocol::GraphqlWs, "graphql-transport-ws", &config).unwrap_err();
        assert!(matches!(err, Error::InvalidSubprotocol { .. }));
    }

    #[test]
    fn test_negotiate_unknown_or_missing() {
        let config = TransportConfig::default();
        assert!(negotiate(WsSubprotocol::Auto, "mqtt", &config).is_err());
        assert!(negotiate(WsSubprotocol::Auto, "", &config).is_err());
    }
}
