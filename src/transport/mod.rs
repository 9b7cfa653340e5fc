//! Subscription transports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   one socket, many ids   ┌──────────────┐
//! │ WsTransport  │─────────────────────────►│ GraphQL WS   │
//! │  (pool)      │◄───── demux by id ───────│ server       │
//! └──────────────┘                          └──────────────┘
//!
//! ┌──────────────┐   one request per sub    ┌──────────────┐
//! │ SseTransport │─────────────────────────►│ graphql-sse  │
//! │              │◄──── event stream ───────│ server       │
//! └──────────────┘                          └──────────────┘
//! ```
//!
//! Both transports hand out [`Subscription`](crate::Subscription)s and close
//! everything they track when their cancellation token fires.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Multiplexed WebSocket connection and read loop |
//! | `pool` | WebSocket pool with single-flight dialing |
//! | `sse_connection` | One streamed SSE response |
//! | `sse_parser` | Incremental SSE wire parser |
//! | `sse_transport` | SSE request building and tracking |

// ============================================================================
// Submodules
// ============================================================================

/// Multiplexed WebSocket connection.
pub mod connection;

/// WebSocket connection pool.
pub mod pool;

/// One streamed SSE response.
pub mod sse_connection;

/// Server-Sent Events parser.
pub mod sse_parser;

/// Server-Sent Events transport.
pub mod sse_transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::WsConnection;
pub use pool::WsTransport;
pub use sse_connection::SseConnection;
pub use sse_parser::{SseEvent, SseParser};
pub use sse_transport::SseTransport;
