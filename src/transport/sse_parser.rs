//! Incremental Server-Sent Events parser.
//!
//! Bytes arrive in arbitrary chunks; the parser buffers partial lines and
//! emits an [`SseEvent`] for every blank-line-terminated event.
//!
//! # Fields
//!
//! | Line | Effect |
//! |------|--------|
//! | `event: <type>` | Sets the event type |
//! | `data: <text>` | Appends a data segment |
//! | `data` | Appends an empty segment |
//! | `: <text>` | Comment, ignored |
//! | `id:` / `retry:` | Ignored |
//! | (blank) | Dispatches the pending event |
//!
//! Data segments are joined with `\n`. An event still pending when the
//! stream ends is discarded.

// ============================================================================
// Imports
// ============================================================================

use crate::error::Error;
use crate::model::{ExecutionResult, GraphQLError, Message};

// ============================================================================
// SseEvent
// ============================================================================

/// One dispatched event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type, empty when the server sent none.
    pub event: String,
    /// Joined data segments.
    pub data: String,
}

impl SseEvent {
    /// Maps the event to a subscription message.
    ///
    /// Events without a recognized type are treated as `next` when they
    /// carry data and as `complete` otherwise. Malformed payloads yield a
    /// terminal decode error.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self.event.as_str() {
            "next" => decode_next(&self.data),
            "error" => decode_error(&self.data),
            "complete" => Message::complete(),
            _ if self.data.trim().is_empty() => Message::complete(),
            _ => decode_next(&self.data),
        }
    }
}

fn decode_next(data: &str) -> Message {
    match serde_json::from_str::<ExecutionResult>(data) {
        Ok(result) => Message::data(result),
        Err(err) => Message::error(Error::decode(format!("invalid next event: {err}"))),
    }
}

fn decode_error(data: &str) -> Message {
    if let Ok(errors) = serde_json::from_str::<Vec<GraphQLError>>(data) {
        return Message::error(Error::graphql(errors));
    }
    match serde_json::from_str::<GraphQLError>(data) {
        Ok(error) => Message::error(Error::graphql(vec![error])),
        Err(err) => Message::error(Error::decode(format!("invalid error event: {err}"))),
    }
}

// ============================================================================
// SseParser
// ============================================================================

/// Line-oriented SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Bytes of the current, unterminated line.
    line: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseParser {
    /// Creates an empty parser.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the events it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();

        for part in chunk.split_inclusive(|&b| b == b'\n') {
            self.line.extend_from_slice(part);
            if self.line.last() != Some(&b'\n') {
                continue;
            }

            let line = std::mem::take(&mut self.line);
            let line = line.strip_suffix(b"\n").unwrap_or(&line[..]);
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if let Some(event) = self.process(&String::from_utf8_lossy(line)) {
                events.push(event);
            }
        }

        events
    }

    fn process(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = value.to_string(),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = std::mem::take(&mut self.event);
        let data = std::mem::take(&mut self.data);
        if event.is_empty() && data.is_empty() {
            return None;
        }

        let mut data = data.join("\n");
        data.truncate(data.trim_end_matches('\n').len());
        Some(SseEvent { event, data })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn parse(input: &str) -> Vec<SseEvent> {
        SseParser::new().push(input.as_bytes())
    }

    #[test]
    fn test_single_event() {
        let events = parse("event: next\ndata: {\"data\":{\"v\":1}}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "next".into(),
                data: "{\"data\":{\"v\":1}}".into(),
            }]
        );
    }

    #[test]
    fn test_multiline_data_joined() {
        let events = parse("event: next\ndata: {\"data\": {\ndata:   \"value\": 42\ndata: }}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"data\": {\n  \"value\": 42\n}}");

        let message = events[0].clone().into_message();
        assert!(message.payload.unwrap().data_str().contains("42"));
    }

    #[test]
    fn test_comments_and_ignored_fields() {
        let events = parse(": keep-alive\nid: 7\nretry: 1000\n\nevent: complete\ndata:\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "complete");
        assert_eq!(events[0].data, "");
    }

    #[test]
    fn test_crlf_line_endings() {
        let events = parse("event: next\r\ndata: {}\r\n\r\n");
        assert_eq!(events[0].event, "next");
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn test_bare_data_line() {
        let events = parse("data\n\n");
        assert_eq!(events, vec![SseEvent::default()]);
        assert!(events[0].clone().into_message().done);
    }

    #[test]
    fn test_incomplete_trailing_event_discarded() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: next\ndata: {}\n").is_empty());
        assert!(parser.push(b"data: partial").is_empty());
    }

    #[test]
    fn test_chunk_boundaries() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"eve").is_empty());
        assert!(parser.push(b"nt: ne").is_empty());
        assert!(parser.push(b"xt\ndata: {\"da").is_empty());
        let events = parser.push(b"ta\":null}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"data\":null}");
    }

    #[test]
    fn test_message_mapping() {
        let complete = SseEvent {
            event: "complete".into(),
            data: String::new(),
        }
        .into_message();
        assert!(complete.done && complete.err.is_none() && complete.payload.is_none());

        let error = SseEvent {
            event: "error".into(),
            data: "[{\"message\":\"Something went wrong\"}]".into(),
        }
        .into_message();
        assert!(error.done);
        let err = error.err.unwrap();
        assert!(err.is_graphql_error());
        assert!(err.to_string().contains("Something went wrong"));

        let implicit = SseEvent {
            event: String::new(),
            data: "{\"data\":{\"value\":99}}".into(),
        }
        .into_message();
        assert!(!implicit.done);
        assert!(implicit.payload.unwrap().data_str().contains("99"));

        let garbage = SseEvent {
            event: "next".into(),
            data: "not json".into(),
        }
        .into_message();
        assert!(garbage.done);
        assert!(matches!(garbage.err, Some(Error::Decode { .. })));
    }

    proptest! {
        #[test]
        fn test_split_point_does_not_matter(split in 0usize..48) {
            let input = "event: next\ndata: {\"data\":1}\n\nevent: complete\n\n";
            let split = split.min(input.len());

            let mut parser = SseParser::new();
            let mut events = parser.push(&input.as_bytes()[..split]);
            events.extend(parser.push(&input.as_bytes()[split..]));

            prop_assert_eq!(events, parse(input));
        }
    }
}
