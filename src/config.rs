//! Transport tuning knobs.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use graphql_subscription_client::TransportConfig;
//!
//! let config = TransportConfig::new()
//!     .with_ack_timeout(Duration::from_secs(5))
//!     .with_channel_capacity(32);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default time allowed for `connection_ack`.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single frame write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on delivering a terminal message during shutdown.
pub const DEFAULT_SHUTDOWN_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Default bound on establishing the TCP/TLS connection and upgrade.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of per-subscription channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

// ============================================================================
// TransportConfig
// ============================================================================

/// Timeouts and buffer sizes shared by every transport of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Deadline for the server to acknowledge `connection_init`.
    pub ack_timeout: Duration,

    /// Deadline for a single outbound frame (pong, unsubscribe).
    pub write_timeout: Duration,

    /// Deadline for handing a terminal message to a slow subscriber while
    /// a connection shuts down.
    pub shutdown_send_timeout: Duration,

    /// Deadline for the WebSocket upgrade.
    pub connect_timeout: Duration,

    /// Capacity of subscriber and listener channels.
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl TransportConfig {
    /// Creates a config with default values.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            shutdown_send_timeout: DEFAULT_SHUTDOWN_SEND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl TransportConfig {
    /// Sets the ack timeout.
    #[inline]
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the write timeout.
    #[inline]
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the shutdown send timeout.
    #[inline]
    #[must_use]
    pub fn with_shutdown_send_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_send_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the channel capacity.
    #[inline]
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl TransportConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message if a timeout is zero or the channel
    /// capacity is zero.
    pub fn validate(&self) -> Result<(), String> {
        let timeouts = [
            ("ack_timeout", self.ack_timeout),
            ("write_timeout", self.write_timeout),
            ("shutdown_send_timeout", self.shutdown_send_timeout),
            ("connect_timeout", self.connect_timeout),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, d)| d.is_zero()) {
            return Err(format!("{name} must be greater than zero"));
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Milliseconds of [`TransportConfig::ack_timeout`], for error reporting.
    #[inline]
    #[must_use]
    pub fn ack_timeout_ms(&self) -> u64 {
        duration_ms(self.ack_timeout)
    }
}

/// Converts a duration to whole milliseconds, saturating.
#[inline]
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
