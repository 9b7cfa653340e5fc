//! The legacy `graphql-ws` dialect (`subscriptions-transport-ws`).
//!
//! # Message Types
//!
//! | Type | Direction | Purpose |
//! |------|-----------|---------|
//! | `connection_init` | Client → Server | Start handshake |
//! | `connection_ack` | Server → Client | Handshake accepted |
//! | `connection_error` | Server → Client | Handshake or connection rejected |
//! | `ka` | Server → Client | Keepalive |
//! | `start` / `stop` | Client → Server | Start / stop operation |
//! | `data` / `error` / `complete` | Server → Client | Operation events |
//!
//! The client never pings; [`Protocol::ping`] and [`Protocol::pong`] are
//! no-ops.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::frame::{self, AckRules, Envelope, FrameSink, FrameStream, Outbound};
use super::{Frame, Protocol};
use crate::config::DEFAULT_ACK_TIMEOUT;
use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::model::{GRAPHQL_WS, Request};

// ============================================================================
// Constants
// ============================================================================

const ACK_RULES: AckRules = AckRules {
    ack: "connection_ack",
    keepalive: "ka",
    keepalive_reply: None,
};

// ============================================================================
// GraphQLWs
// ============================================================================

/// The legacy dialect.
#[derive(Debug, Clone, Copy)]
pub struct GraphQLWs {
    ack_timeout: Duration,
}

impl Default for GraphQLWs {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphQLWs {
    /// Creates the dialect with the default ack timeout.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Sets the ack timeout.
    #[inline]
    #[must_use]
    pub const fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    fn decode(envelope: Envelope) -> Result<Frame> {
        match envelope.kind.as_str() {
            "data" => Ok(Frame::Data {
                id: envelope.require_id()?,
                payload: envelope.execution_result()?,
            }),
            "error" => Ok(Frame::Error {
                id: envelope.subscription_id(),
                error: envelope.graphql_error(),
            }),
            "complete" => Ok(Frame::Complete {
                id: envelope.require_id()?,
            }),
            "ka" => Ok(Frame::Ping),
            // Connection-scoped: no id.
            "connection_error" => Ok(Frame::Error {
                id: None,
                error: Error::connection_error(envelope.raw_payload()),
            }),
            other => Err(Error::unknown_message_type(other)),
        }
    }
}

#[async_trait]
impl Protocol for GraphQLWs {
    fn subprotocol(&self) -> &'static str {
        GRAPHQL_WS
    }

    async fn init(
        &self,
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        payload: Option<&Value>,
    ) -> Result<()> {
        frame::handshake(sink, stream, payload, ACK_RULES, self.ack_timeout).await
    }

    async fn subscribe(
        &self,
        sink: &mut FrameSink,
        id: &SubscriptionId,
        request: &Request,
    ) -> Result<()> {
        let frame = Outbound::new("start").with_id(id).with_payload(Some(request));
        frame::send(sink, &frame).await
    }

    async fn unsubscribe(&self, sink: &mut FrameSink, id: &SubscriptionId) -> Result<()> {
        frame::send(sink, &Outbound::new("stop").with_id(id)).await
    }

    async fn read(&self, stream: &mut FrameStream) -> Result<Frame> {
        let envelope = frame::read_envelope(stream).await?;
        Self::decode(envelope)
    }

    async fn ping(&self, _sink: &mut FrameSink) -> Result<()> {
        Ok(())
    }

    async fn pong(&self, _sink: &mut FrameSink) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::testing::frame_pipe;

    fn protocol() -> GraphQLWs {
        GraphQLWs::new().with_ack_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_init_tolerates_keepalive() {
        let (mut sink, mut stream, mut peer) = frame_pipe();
        peer.push(json!({ "type": "ka" })).await;
        peer.push(json!({ "type": "connection_ack" })).await;

        protocol()
            .init(&mut sink, &mut stream, Some(&json!({ "secret": "token" })))
            .await
            .unwrap();

        let sent = peer.next_sent().await;
        assert_eq!(sent["type"], "connection_init");
        assert_eq!(sent["payload"]["secret"], "token");
        // ka is not answered.
        assert!(peer.try_next_sent().is_none());
    }

    #[tokio::test]
    async fn test_init_connection_error() {
        let (mut sink, mut stream, mut peer) = frame_pipe();
        peer.push(json!({ "type": "connection_error", "payload": { "message": "auth failed" } }))
            .await;

        let err = protocol()
            .init(&mut sink, &mut stream, None)
            .await
            .unwrap_err();
        assert!(err.is_handshake_error());
        assert!(err.to_string().contains("auth failed"));
    }

    #[tokio::test]
    async fn test_init_times_out() {
        let (mut sink, mut stream, _peer) = frame_pipe();
        let err = protocol()
            .init(&mut sink, &mut stream, None)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_start_and_stop_frames() {
        let (mut sink, _stream, mut peer) = frame_pipe();
        let id = SubscriptionId::from("sub-1");
        let request = Request::new("subscription { test }").with_variables(json!({ "id": 123 }));

        protocol().subscribe(&mut sink, &id, &request).await.unwrap();
        protocol().unsubscribe(&mut sink, &id).await.unwrap();

        let start = peer.next_sent().await;
        assert_eq!(start["type"], "start");
        assert_eq!(start["id"], "sub-1");
        assert_eq!(start["payload"]["variables"]["id"], 123);

        assert_eq!(
            peer.next_sent().await,
            json!({ "id": "sub-1", "type": "stop" })
        );
    }

    #[tokio::test]
    async fn test_read_decodes_frames() {
        let (_sink, mut stream, mut peer) = frame_pipe();
        peer.push(json!({ "id": "sub-1", "type": "data", "payload": { "data": { "v": 42 } } }))
            .await;
        peer.push(json!({ "id": "sub-1", "type": "error", "payload": [{ "message": "something went wrong" }] }))
            .await;
        peer.push(json!({ "id": "sub-1", "type": "complete" })).await;
        peer.push(json!({ "type": "ka" })).await;
        peer.push(json!({ "type": "connection_error", "payload": { "message": "session expired" } }))
            .await;

        let p = protocol();
        match p.read(&mut stream).await.unwrap() {
            Frame::Data { id, payload } => {
                assert_eq!(id.as_str(), "sub-1");
                assert!(payload.data_str().contains("42"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match p.read(&mut stream).await.unwrap() {
            Frame::Error { error, .. } => {
                assert!(error.to_string().contains("something went wrong"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(p.read(&mut stream).await.unwrap(), Frame::Complete { .. }));
        assert!(matches!(p.read(&mut stream).await.unwrap(), Frame::Ping));
        match p.read(&mut stream).await.unwrap() {
            Frame::Error { id: None, error } => {
                assert!(error.to_string().contains("session expired"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_unknown_type() {
        let (_sink, mut stream, mut peer) = frame_pipe();
        peer.push(json!({ "type": "next", "id": "1" })).await;

        let err = protocol().read(&mut stream).await.unwrap_err();
        assert!(err.to_string().contains("Unknown"));
    }

    #[tokio::test]
    async fn test_ping_pong_are_noops() {
        let (mut sink, _stream, mut peer) = frame_pipe();
        protocol().ping(&mut sink).await.unwrap();
        protocol().pong(&mut sink).await.unwrap();
        assert!(peer.try_next_sent().is_none());
    }
}
