//! GraphQL subscription client - WebSocket and Server-Sent Events transports.
//!
//! This library streams GraphQL subscription results from upstream servers
//! over either transport, sharing physical connections and identical
//! subscriptions between callers.
//!
//! # Architecture
//!
//! ```text
//! Client ──(dedup)──► WsTransport ──► WsConnection ──► Protocol ──► socket
//!    │                                   (demux by id)
//!    └──────────────► SseTransport ──► SseConnection ──► HTTP body
//! ```
//!
//! Key design principles:
//!
//! - One WebSocket per connection identity (endpoint, subprotocol, headers,
//!   init payload), dialed once even under concurrent demand
//! - Identical subscriptions share one upstream; each caller gets its own
//!   bounded channel
//! - Every teardown path is idempotent and ends in the same terminal state
//! - Both `graphql-transport-ws` and legacy `graphql-ws` are spoken
//!
//! # Quick Start
//!
//! ```no_run
//! use graphql_subscription_client::{Client, Options, Request, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder().build()?;
//!
//!     let request = Request::new("subscription { ticker { price } }");
//!     let options = Options::new("ws://localhost:4000/graphql");
//!
//!     let mut sub = client.subscribe(&request, &options).await?;
//!     while let Some(message) = sub.recv().await {
//!         if let Some(err) = message.err {
//!             eprintln!("subscription failed: {err}");
//!             break;
//!         }
//!         if let Some(payload) = message.payload {
//!             println!("{}", payload.data_str());
//!         }
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`] facade and [`ClientBuilder`] |
//! | [`config`] | [`TransportConfig`] timeouts and capacities |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID and key wrappers |
//! | [`key`] | Connection and subscription identity hashing |
//! | [`model`] | Requests, results, messages, options |
//! | [`protocol`] | WebSocket subscription dialects |
//! | [`transport`] | WebSocket pool and SSE transport |

// ============================================================================
// Modules
// ============================================================================

/// Subscription client with deduplication and fan-out.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Transport timeouts and capacities.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing subscription ids and identity keys.
pub mod identifiers;

/// Identity hashing for pooling and deduplication.
pub mod key;

/// Requests, results, messages and options.
pub mod model;

/// WebSocket subscription dialects.
pub mod protocol;

/// Transport layer.
///
/// WebSocket pooling and demultiplexing, SSE streaming.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, Stats};

// Configuration
pub use config::TransportConfig;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionKey, ListenerId, SubscriptionId, SubscriptionKey};

// Model types
pub use model::{
    CancelHandle, ExecutionResult, GraphQLError, Location, Message, Options, Request, SseMethod,
    Subscription, TransportKind, WsSubprotocol,
};

// Transport types
pub use transport::{SseTransport, WsTransport};
