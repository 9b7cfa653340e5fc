//! Caller-side subscription handle.
//!
//! Every `subscribe` in the crate hands back a [`Subscription`]: the
//! receiving end of a bounded channel plus a [`CancelHandle`]. Dropping the
//! handle cancels it, so a caller that simply stops caring releases the
//! upstream resources.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::Message;

// ============================================================================
// Types
// ============================================================================

/// Deferred teardown action.
type CancelFn = Box<dyn FnOnce() + Send>;

// ============================================================================
// CancelHandle
// ============================================================================

/// Runs a teardown action at most once.
///
/// The action runs on the first [`CancelHandle::cancel`] call, or on drop if
/// it was never called. Later calls are no-ops.
pub struct CancelHandle {
    action: Mutex<Option<CancelFn>>,
}

impl CancelHandle {
    /// Wraps a teardown action.
    #[must_use]
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// A handle with nothing to do.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            action: Mutex::new(None),
        }
    }

    /// Runs the action if it has not run yet.
    pub fn cancel(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Returns `true` once the action has run.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.action.lock().is_none()
    }

    /// Drops the action without running it.
    pub fn disarm(&self) {
        self.action.lock().take();
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A live subscription stream.
///
/// Yields [`Message`]s in upstream order. The stream ends (`None`) when the
/// upstream completes, fails, or the subscription is cancelled.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Message>,
    cancel: CancelHandle,
}

impl Subscription {
    /// Bundles a receiver with its teardown action.
    #[inline]
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Message>, cancel: CancelHandle) -> Self {
        Self { rx, cancel }
    }

    /// Receives the next message.
    ///
    /// Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Receives a message if one is buffered.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Cancels the subscription and stops accepting messages.
    ///
    /// Idempotent. Messages already buffered can still be drained.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    /// Returns `true` if [`Subscription::cancel`] has run.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Splits into the receiver and the cancel handle.
    #[must_use]
    pub fn into_parts(self) -> (mpsc::Receiver<Message>, CancelHandle) {
        (self.rx, self.cancel)
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ============================================================================
// Tests
// ============================================================================
