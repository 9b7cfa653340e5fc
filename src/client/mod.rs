//! Subscription client module.
//!
//! This module provides the main entry point for subscribing.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Routes subscriptions, deduplicates and fans out |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`Stats`] | Connection and listener counters |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

/// Deduplicated upstream subscription with fan-out.
mod shared;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::{Client, Stats};
