//! Error types for the subscription client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use graphql_subscription_client::{Error, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     let mut sub = client.subscribe(request, options).await?;
//!     while let Some(message) = sub.recv().await {
//!         if let Some(err) = message.err {
//!             return Err(err);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Misuse | [`Error::ClientClosed`], [`Error::ConnectionClosed`], [`Error::SubscriptionExists`], [`Error::SubscriptionClosed`] |
//! | Handshake | [`Error::AckTimeout`], [`Error::AckNotReceived`], [`Error::ConnectionError`], [`Error::FailedUpgrade`], [`Error::InvalidSubprotocol`] |
//! | Wire | [`Error::Decode`], [`Error::UnknownMessageType`] |
//! | SSE | [`Error::UnexpectedStatus`], [`Error::UnexpectedContentType`] |
//! | GraphQL | [`Error::GraphQL`] |
//! | Configuration | [`Error::Config`], [`Error::InvalidEndpoint`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Http`] |
//!
//! `Error` is `Clone`: a single terminal error is broadcast to every
//! subscriber of a dying connection and to every caller waiting on a dial.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::SubscriptionId;
use crate::model::GraphQLError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The client (or transport) has been shut down.
    #[error("Client closed")]
    ClientClosed,

    /// The physical connection is closed or closing.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A subscription with this id is already registered on the connection.
    #[error("Subscription already exists: {id}")]
    SubscriptionExists {
        /// The duplicated subscription id.
        id: SubscriptionId,
    },

    /// The shared subscription was torn down before the listener joined.
    #[error("Subscription closed")]
    SubscriptionClosed,

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// The server did not acknowledge `connection_init` in time.
    #[error("Connection ack not received within {timeout_ms}ms")]
    AckTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// The server answered `connection_init` with something other than an ack.
    #[error("Connection ack not received, got message type '{message_type}'")]
    AckNotReceived {
        /// The message type the server sent instead.
        message_type: String,
    },

    /// The server rejected the connection with a `connection_error` frame.
    #[error("Connection error: {payload}")]
    ConnectionError {
        /// Raw payload of the error frame.
        payload: String,
    },

    /// The HTTP upgrade to WebSocket was refused.
    #[error("Failed to upgrade connection to {url}, status code: {status}")]
    FailedUpgrade {
        /// Endpoint that was dialed.
        url: String,
        /// HTTP status returned instead of 101.
        status: u16,
    },

    /// The server accepted a subprotocol this client does not speak, or one
    /// other than the pinned subprotocol.
    #[error(
        "Provided websocket subprotocol '{subprotocol}' is not supported. \
         The supported subprotocols are graphql-ws and graphql-transport-ws"
    )]
    InvalidSubprotocol {
        /// The accepted subprotocol string.
        subprotocol: String,
    },

    // ========================================================================
    // Wire Errors
    // ========================================================================
    /// A frame or event could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// A frame carried a `type` this dialect does not know.
    #[error("Unknown message type: {message_type}")]
    UnknownMessageType {
        /// The literal type string.
        message_type: String,
    },

    // ========================================================================
    // SSE Errors
    // ========================================================================
    /// The SSE endpoint answered with a non-2xx status.
    #[error("Unexpected status {status}{}", .body.as_deref().map(|b| format!(": {b}")).unwrap_or_default())]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, if any was sent.
        body: Option<String>,
    },

    /// The SSE endpoint answered with a content type other than `text/event-stream`.
    #[error("Unexpected content-type: {content_type}")]
    UnexpectedContentType {
        /// The received content type.
        content_type: String,
    },

    // ========================================================================
    // GraphQL Errors
    // ========================================================================
    /// Errors reported by the GraphQL server for one subscription.
    ///
    /// These are not transport faults.
    #[error("GraphQL errors: {}", join_messages(.errors))]
    GraphQL {
        /// The errors as sent by the server.
        errors: Vec<GraphQLError>,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// The endpoint is not a valid URL.
    #[error("Invalid endpoint '{endpoint}': {message}")]
    InvalidEndpoint {
        /// The endpoint as configured.
        endpoint: String,
        /// Parser message.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(Arc<WsError>),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(Arc<reqwest::Error>),
}

/// Joins GraphQL error messages for display.
fn join_messages(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Conversions
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Self::WebSocket(Arc::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Arc::new(err))
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a subscription exists error.
    #[inline]
    pub fn subscription_exists(id: SubscriptionId) -> Self {
        Self::SubscriptionExists { id }
    }

    /// Creates an ack timeout error.
    #[inline]
    pub fn ack_timeout(timeout_ms: u64) -> Self {
        Self::AckTimeout { timeout_ms }
    }

    /// Creates an ack not received error.
    #[inline]
    pub fn ack_not_received(message_type: impl Into<String>) -> Self {
        Self::AckNotReceived {
            message_type: message_type.into(),
        }
    }

    /// Creates a connection error from a raw payload.
    #[inline]
    pub fn connection_error(payload: impl Into<String>) -> Self {
        Self::ConnectionError {
            payload: payload.into(),
        }
    }

    /// Creates a failed upgrade error.
    #[inline]
    pub fn failed_upgrade(url: impl Into<String>, status: u16) -> Self {
        Self::FailedUpgrade {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid subprotocol error.
    #[inline]
    pub fn invalid_subprotocol(subprotocol: impl Into<String>) -> Self {
        Self::InvalidSubprotocol {
            subprotocol: subprotocol.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an unknown message type error.
    #[inline]
    pub fn unknown_message_type(message_type: impl Into<String>) -> Self {
        Self::UnknownMessageType {
            message_type: message_type.into(),
        }
    }

    /// Creates an unexpected status error.
    #[inline]
    pub fn unexpected_status(status: u16, body: Option<String>) -> Self {
        Self::UnexpectedStatus { status, body }
    }

    /// Creates an unexpected content type error.
    #[inline]
    pub fn unexpected_content_type(content_type: impl Into<String>) -> Self {
        Self::UnexpectedContentType {
            content_type: content_type.into(),
        }
    }

    /// Creates a GraphQL error.
    #[inline]
    pub fn graphql(errors: Vec<GraphQLError>) -> Self {
        Self::GraphQL { errors }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid endpoint error.
    #[inline]
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AckTimeout { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if the error happened while establishing a connection.
    #[inline]
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::AckTimeout { .. }
                | Self::AckNotReceived { .. }
                | Self::ConnectionError { .. }
                | Self::FailedUpgrade { .. }
                | Self::InvalidSubprotocol { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::ConnectionError { .. } | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the server reported GraphQL errors.
    #[inline]
    #[must_use]
    pub fn is_graphql_error(&self) -> bool {
        matches!(self, Self::GraphQL { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
