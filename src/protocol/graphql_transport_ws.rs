//! The `graphql-transport-ws` dialect.
//!
//! # Message Types
//!
//! | Type | Direction | Purpose |
//! |------|-----------|---------|
//! | `connection_init` | Client → Server | Start handshake |
//! | `connection_ack` | Server → Client | Handshake accepted |
//! | `ping` / `pong` | Both | Keepalive |
//! | `subscribe` | Client → Server | Start operation |
//! | `next` | Server → Client | Operation result |
//! | `error` | Server → Client | Operation failed |
//! | `complete` | Both | Operation finished / stop operation |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::frame::{self, AckRules, FrameSink, FrameStream, Outbound};
use super::{Frame, Protocol};
use crate::config::DEFAULT_ACK_TIMEOUT;
use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::model::{GRAPHQL_TRANSPORT_WS, Request};

// ============================================================================
// Constants
// ============================================================================

const ACK_RULES: AckRules = AckRules {
    ack: "connection_ack",
    keepalive: "ping",
    keepalive_reply: Some("pong"),
};

// ============================================================================
// GraphQLTransportWs
// ============================================================================

/// The modern dialect.
#[derive(Debug, Clone, Copy)]
pub struct GraphQLTransportWs {
    ack_timeout: Duration,
}

impl Default for GraphQLTransportWs {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphQLTransportWs {
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

    fn decode(envelope: frame::Envelope) -> Result<Frame> {
        match envelope.kind.as_str() {
            "next" => Ok(Frame::Data {
                id: envelope.require_id()?,
                payload: envelope.execution_result()?,
            }),
            "error" => Ok(Frame::Error {
                id: Some(envelope.require_id()?),
                error: envelope.graphql_error(),
            }),
            "complete" => Ok(Frame::Complete {
                id: envelope.require_id()?,
            }),
            "ping" => Ok(Frame::Ping),
            "pong" => Ok(Frame::Pong),
            other => Err(Error::unknown_message_type(other)),
        }
    }
}

#[async_trait]
impl Protocol for GraphQLTransportWs {
    fn subprotocol(&self) -> &'static str {
        GRAPHQL_TRANSPORT_WS
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
        let frame = Outbound::new("subscribe")
            .with_id(id)
            .with_payload(Some(request));
        frame::send(sink, &frame).await
    }

    async fn unsubscribe(&self, sink: &mut FrameSink, id: &SubscriptionId) -> Result<()> {
        frame::send(sink, &Outbound::new("complete").with_id(id)).await
    }

    async fn read(&self, stream: &mut FrameStream) -> Result<Frame> {
        let envelope = frame::read_envelope(stream).await?;
        Self::decode(envelope)
    }

    async fn ping(&self, sink: &mut FrameSink) -> Result<()> {
        frame::send(sink, &Outbound::new("ping")).await
    }

    async fn pong(&self, sink: &mut FrameSink) -> Result<()> {
        frame::send(sink, &Outbound::new("pong")).await
    }
}

// ============================================================================
// Tests
// ============================================================================
