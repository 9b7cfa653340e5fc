//! Builder pattern for client configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use graphql_subscription_client::{Client, TransportConfig};
//!
//! # async fn example() -> graphql_subscription_client::Result<()> {
//! let client = Client::builder()
//!     .config(TransportConfig::new().with_ack_timeout(Duration::from_secs(10)))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::{Error, Result};

use super::core::Client;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`] instance.
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ClientBuilder {
    /// Timeouts and channel capacity.
    config: TransportConfig,
    /// HTTP client for SSE streams.
    http_client: Option<reqwest::Client>,
    /// Parent token; the client owns a child of it.
    token: Option<CancellationToken>,
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transport configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the HTTP client used for SSE requests.
    ///
    /// Proxies, TLS roots and default headers configured on `client` apply
    /// to every SSE subscription.
    #[inline]
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Ties the client's lifetime to `token`.
    ///
    /// Cancelling `token` closes the client. Closing the client does not
    /// cancel `token`.
    #[inline]
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a timeout or the channel capacity is zero
    /// - [`Error::Config`] if called outside a Tokio runtime
    /// - [`Error::Http`] if the default HTTP client cannot be created
    pub fn build(self) -> Result<Client> {
        self.config.validate().map_err(Error::config)?;
        // Transports spawn their watcher tasks on construction.
        Handle::try_current()
            .map_err(|_| Error::config("client must be built inside a Tokio runtime"))?;

        let http = match self.http_client {
            Some(http) => http,
            None => reqwest::Client::builder().build()?,
        };
        let parent = self.token.unwrap_or_default();

        Ok(Client::from_parts(self.config, http, &parent))
    }
}

// ============================================================================
// Tests
// ============================================================================
