//! Shared value types.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | [`Request`], [`ExecutionResult`], [`GraphQLError`] |
//! | `message` | [`Message`] delivered to subscribers |
//! | `options` | [`Options`] and transport/dialect selectors |
//! | `subscription` | [`Subscription`] handle and [`CancelHandle`] |

// ============================================================================
// Submodules
// ============================================================================

/// Messages delivered to subscribers.
pub mod message;

/// Per-subscription transport options.
pub mod options;

/// GraphQL request and result types.
pub mod request;

/// Caller-side subscription handle.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::Message;
pub use options::{GRAPHQL_TRANSPORT_WS, GRAPHQL_WS, Options, SseMethod, TransportKind, WsSubprotocol};
pub use request::{ExecutionResult, GraphQLError, Location, Request};
pub use subscription::{CancelHandle, Subscription};
