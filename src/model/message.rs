//! Messages delivered to subscribers.

// ============================================================================
// Imports
// ============================================================================

use crate::error::Error;

use super::ExecutionResult;

// ============================================================================
// Message
// ============================================================================

/// One item of a subscription stream.
///
/// | `payload` | `err` | `done` | Meaning |
/// |-----------|-------|--------|---------|
/// | `Some` | `None` | `false` | Next result |
/// | `None` | `Some` | `true` | Terminal error (transport or GraphQL) |
/// | `None` | `None` | `true` | Completed by the server |
///
/// The channel closes after a `done` message, or without one when the
/// subscription was cancelled locally or the stream simply ended.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Result payload, if this message carries one.
    pub payload: Option<ExecutionResult>,
    /// Transport, protocol or GraphQL-level failure.
    pub err: Option<Error>,
    /// Terminal marker; nothing follows.
    pub done: bool,
}

impl Message {
    /// Creates a data message.
    #[inline]
    #[must_use]
    pub fn data(payload: ExecutionResult) -> Self {
        Self {
            payload: Some(payload),
            err: None,
            done: false,
        }
    }

    /// Creates a terminal error message.
    #[inline]
    #[must_use]
    pub fn error(err: Error) -> Self {
        Self {
            payload: None,
            err: Some(err),
            done: true,
        }
    }

    /// Creates a terminal completion message.
    #[inline]
    #[must_use]
    pub fn complete() -> Self {
        Self {
            payload: None,
            err: None,
            done: true,
        }
    }

    /// Returns `true` if nothing follows this message.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.done
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let data = Message::data(ExecutionResult::default());
        assert!(data.payload.is_some() && !data.done);

        let err = Message::error(Error::ConnectionClosed);
        assert!(err.err.is_some() && err.is_terminal());

        let complete = Message::complete();
        assert!(complete.payload.is_none() && complete.err.is_none() && complete.done);
    }
}
