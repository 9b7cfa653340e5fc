//! Wire envelope and decoded frames.
//!
//! Both dialects exchange JSON text frames of the same shape:
//!
//! ```json
//! {
//!   "id": "subscription-id",
//!   "type": "next",
//!   "payload": { ... }
//! }
//! ```
//!
//! `id` and `payload` are optional. Only the `type` vocabulary differs
//! between dialects, so envelope handling lives here and each dialect only
//! maps types to [`Frame`]s.

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, trace};

use crate::config::duration_ms;
use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::model::{ExecutionResult, GraphQLError};

// ============================================================================
// Types
// ============================================================================

/// Write half of a WebSocket.
pub type FrameSink = Pin<Box<dyn Sink<WsMessage, Error = WsError> + Send>>;

/// Read half of a WebSocket.
pub type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<WsMessage, WsError>> + Send>>;

// ============================================================================
// Frame
// ============================================================================

/// A decoded inbound frame, independent of dialect.
#[derive(Debug)]
pub enum Frame {
    /// A result for one subscription.
    Data {
        /// Target subscription.
        id: SubscriptionId,
        /// Decoded result.
        payload: ExecutionResult,
    },

    /// A failure. Without `id` it concerns the whole connection.
    Error {
        /// Target subscription, if any.
        id: Option<SubscriptionId>,
        /// The failure.
        error: Error,
    },

    /// The server finished a subscription.
    Complete {
        /// Target subscription.
        id: SubscriptionId,
    },

    /// Keepalive request (or legacy `ka`).
    Ping,

    /// Keepalive answer.
    Pong,
}

impl Frame {
    /// Returns the subscription this frame targets.
    #[must_use]
    pub fn id(&self) -> Option<&SubscriptionId> {
        match self {
            Self::Data { id, .. } | Self::Complete { id } => Some(id),
            Self::Error { id, .. } => id.as_ref(),
            Self::Ping | Self::Pong => None,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Inbound wire frame with the payload left raw.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl Envelope {
    /// Returns the subscription id, which this frame type requires.
    pub fn require_id(&self) -> Result<SubscriptionId> {
        self.id
            .as_deref()
            .map(SubscriptionId::from)
            .ok_or_else(|| Error::decode(format!("'{}' frame without id", self.kind)))
    }

    /// Returns the optional subscription id.
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.id.as_deref().map(SubscriptionId::from)
    }

    /// Decodes the payload as an execution result.
    pub fn execution_result(&self) -> Result<ExecutionResult> {
        match self.payload.as_deref() {
            Some(raw) => serde_json::from_str(raw.get())
                .map_err(|e| Error::decode(format!("invalid '{}' payload: {e}", self.kind))),
            None => Ok(ExecutionResult::default()),
        }
    }

    /// Decodes the payload as GraphQL errors.
    ///
    /// Accepts an array of errors, a single error object, or anything else
    /// (kept verbatim as the message). A missing payload still yields an
    /// error.
    pub fn graphql_error(&self) -> Error {
        let Some(raw) = self.payload.as_deref() else {
            return Error::graphql(vec![GraphQLError::new("subscription error")]);
        };
        if let Ok(errors) = serde_json::from_str::<Vec<GraphQLError>>(raw.get()) {
            return Error::graphql(errors);
        }
        if let Ok(error) = serde_json::from_str::<GraphQLError>(raw.get()) {
            return Error::graphql(vec![error]);
        }
        Error::graphql(vec![GraphQLError::new(raw.get())])
    }

    /// Returns the raw payload text, or `""`.
    pub fn raw_payload(&self) -> &str {
        self.payload.as_deref().map(RawValue::get).unwrap_or_default()
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Outbound wire frame.
#[derive(Debug, Serialize)]
pub(crate) struct Outbound<'a, P: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,

    #[serde(rename = "type")]
    kind: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a P>,
}

impl<'a> Outbound<'a, ()> {
    /// Frame with only a type.
    pub fn new(kind: &'a str) -> Self {
        Self {
            id: None,
            kind,
            payload: None,
        }
    }
}

impl<'a, P: Serialize> Outbound<'a, P> {
    /// Sets the subscription id.
    pub fn with_id(mut self, id: &'a SubscriptionId) -> Self {
        self.id = Some(id.as_str());
        self
    }

    /// Attaches a payload.
    pub fn with_payload<Q: Serialize>(self, payload: Option<&'a Q>) -> Outbound<'a, Q> {
        Outbound {
            id: self.id,
            kind: self.kind,
            payload,
        }
    }
}

// ============================================================================
// I/O Helpers
// ============================================================================

/// Serializes and sends one frame.
pub(crate) async fn send<P: Serialize + Sync>(
    sink: &mut FrameSink,
    frame: &Outbound<'_, P>,
) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    trace!(kind = frame.kind, "Sending frame");
    sink.send(WsMessage::Text(json.into())).await?;
    Ok(())
}

/// Reads the next JSON envelope.
///
/// WebSocket-level ping/pong frames are skipped. A close frame or the end
/// of the stream yields [`Error::ConnectionClosed`].
pub(crate) async fn read_envelope(stream: &mut FrameStream) -> Result<Envelope> {
    loop {
        let message = match stream.next().await {
            Some(message) => message?,
            None => return Err(Error::ConnectionClosed),
        };

        match message {
            WsMessage::Text(text) => return parse_envelope(text.as_bytes()),
            WsMessage::Binary(bytes) => return parse_envelope(&bytes),
            WsMessage::Close(frame) => {
                debug!(?frame, "WebSocket closed by remote");
                return Err(Error::ConnectionClosed);
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
}

fn parse_envelope(bytes: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| Error::decode(format!("invalid frame: {e}")))?;
    trace!(kind = %envelope.kind, id = ?envelope.id, "Received frame");
    Ok(envelope)
}

// ============================================================================
// Handshake
// ============================================================================

/// How a dialect treats frames that arrive before the ack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AckRules {
    /// Frame type meaning "acknowledged".
    pub ack: &'static str,
    /// Keepalive frame type tolerated before the ack.
    pub keepalive: &'static str,
    /// Frame type sent in answer to the keepalive, if any.
    pub keepalive_reply: Option<&'static str>,
}

/// Sends `connection_init` and waits for the ack.
///
/// The whole exchange is bounded by `ack_timeout`.
pub(crate) async fn handshake(
    sink: &mut FrameSink,
    stream: &mut FrameStream,
    payload: Option<&serde_json::Value>,
    rules: AckRules,
    ack_timeout: Duration,
) -> Result<()> {
    timeout(ack_timeout, exchange(sink, stream, payload, rules))
        .await
        .map_err(|_| Error::ack_timeout(duration_ms(ack_timeout)))?
}

async fn exchange(
    sink: &mut FrameSink,
    stream: &mut FrameStream,
    payload: Option<&serde_json::Value>,
    rules: AckRules,
) -> Result<()> {
    send(sink, &Outbound::new("connection_init").with_payload(payload)).await?;

    loop {
        let envelope = read_envelope(stream).await?;
        match envelope.kind.as_str() {
            kind if kind == rules.ack => return Ok(()),
            kind if kind == rules.keepalive => {
                trace!(kind, "Keepalive before ack");
                if let Some(reply) = rules.keepalive_reply {
                    send(sink, &Outbound::new(reply)).await?;
                }
            }
            "connection_error" => {
                return Err(Error::connection_error(envelope.raw_payload()));
            }
            other => return Err(Error::ack_not_received(other)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn envelope(json: &str) -> Envelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_outbound_skips_absent_fields() {
        let json = serde_json::to_value(Outbound::new("ping")).unwrap();
        assert_eq!(json, json!({ "type": "ping" }));
    }

    #[test]
    fn test_outbound_with_id_and_payload() {
        let id = SubscriptionId::from("1");
        let payload = json!({ "query": "subscription { a }" });
        let frame = Outbound::new("subscribe")
            .with_id(&id)
            .with_payload(Some(&payload));
        let json = serde_json::to_value(frame).unwrap();
        assert_eq!(
            json,
            json!({ "id": "1", "type": "subscribe", "payload": { "query": "subscription { a }" } })
        );
    }

    #[test]
    fn test_envelope_execution_result() {
        let env = envelope(r#"{"id":"1","type":"next","payload":{"data":{"a":1}}}"#);
        assert_eq!(env.require_id().unwrap().as_str(), "1");
        assert_eq!(env.execution_result().unwrap().data_str(), r#"{"a":1}"#);
    }

    #[test]
    fn test_envelope_missing_id() {
        let env = envelope(r#"{"type":"complete"}"#);
        assert!(matches!(env.require_id(), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_graphql_error_shapes() {
        let array = envelope(r#"{"type":"error","payload":[{"message":"a"},{"message":"b"}]}"#);
        match array.graphql_error() {
            Error::GraphQL { errors } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {other:?}"),
        }

        let object = envelope(r#"{"type":"error","payload":{"message":"boom"}}"#);
        assert!(object.graphql_error().to_string().contains("boom"));

        let bare = envelope(r#"{"type":"error"}"#);
        assert!(bare.graphql_error().is_graphql_error());
    }
}
