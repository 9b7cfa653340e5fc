//! One streamed HTTP response carrying one subscription.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::sse_parser::SseParser;
use crate::error::Error;
use crate::model::Message;

// ============================================================================
// SseConnection
// ============================================================================

/// An open Server-Sent Events stream.
///
/// SSE has no multiplexing: every subscription owns its own connection.
/// Closing is idempotent and interrupts both reading and any pending
/// delivery.
pub struct SseConnection {
    done: CancellationToken,
    endpoint: String,
}

impl fmt::Debug for SseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseConnection")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SseConnection {
    /// Creates a connection closed by `done`.
    pub(crate) fn new(done: CancellationToken, endpoint: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            done,
            endpoint: endpoint.into(),
        })
    }

    /// Stops reading and releases the response body.
    #[inline]
    pub fn close(&self) {
        self.done.cancel();
    }

    /// Returns `true` once closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Reads `body` until it ends, fails, completes or the connection closes.
    ///
    /// A read failure is delivered as a terminal error unless the connection
    /// was already closed. `on_close` runs exactly once, before `tx` is
    /// dropped.
    pub(crate) async fn read_loop<S, B, E>(
        self: Arc<Self>,
        body: S,
        tx: mpsc::Sender<Message>,
        on_close: impl FnOnce() + Send,
    ) where
        S: Stream<Item = Result<B, E>> + Send,
        B: AsRef<[u8]> + Send,
        E: Into<Error> + Send,
    {
        let mut body = pin!(body);
        let mut parser = SseParser::new();

        'read: loop {
            let chunk = tokio::select! {
                biased;
                () = self.done.cancelled() => break,
                chunk = body.next() => chunk,
            };

            match chunk {
                None => {
                    trace!(endpoint = %self.endpoint, "SSE stream ended");
                    break;
                }
                Some(Err(err)) => {
                    let err: Error = err.into();
                    if !self.is_closed() {
                        warn!(endpoint = %self.endpoint, error = %err, "SSE read failed");
                        self.deliver(&tx, Message::error(err)).await;
                    }
                    break;
                }
                Some(Ok(bytes)) => {
                    for event in parser.push(bytes.as_ref()) {
                        let message = event.into_message();
                        let terminal = message.is_terminal();
                        if !self.deliver(&tx, message).await || terminal {
                            break 'read;
                        }
                    }
                }
            }
        }

        self.close();
        debug!(endpoint = %self.endpoint, "SSE connection closed");
        on_close();
        // Ends the subscriber's stream.
        drop(tx);
    }

    /// Sends to the subscriber unless the connection closes first.
    async fn deliver(&self, tx: &mpsc::Sender<Message>, message: Message) -> bool {
        tokio::select! {
            biased;
            () = self.done.cancelled() => false,
            sent = tx.send(message) => sent.is_ok(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
