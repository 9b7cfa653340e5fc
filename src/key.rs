//! Identity keys for connection reuse and subscription dedup.
//!
//! Both keys are 64-bit FxHash digests over a canonical encoding. Fields are
//! separated by a NUL byte so that adjacent fields cannot bleed into each
//! other, headers are sorted by name (repeated values keep their order),
//! and JSON values are serialized through `serde_json` whose maps are
//! ordered.
//!
//! | Key | Inputs |
//! |-----|--------|
//! | [`ConnectionKey`] | endpoint, subprotocol, headers, init payload |
//! | [`SubscriptionKey`] | everything in [`ConnectionKey`], transport, SSE method, query, operation name, variables, extensions |

// ============================================================================
// Imports
// ============================================================================

use std::hash::Hasher;

use reqwest::header::HeaderMap;
use rustc_hash::FxHasher;
use serde_json::Value;

use crate::identifiers::{ConnectionKey, SubscriptionKey};
use crate::model::{Options, Request};

// ============================================================================
// Constants
// ============================================================================

/// Field separator.
const SEP: &[u8] = b"\x00";

// ============================================================================
// Public API
// ============================================================================

/// Computes the WebSocket connection identity for `options`.
///
/// Two subscriptions share a connection only if their keys match.
#[must_use]
pub fn connection_key(options: &Options) -> ConnectionKey {
    let mut hasher = KeyHasher::default();
    hasher.field(options.endpoint.as_bytes());
    hasher.field(options.ws_subprotocol.as_str().as_bytes());
    hasher.headers(&options.headers);
    hasher.json(options.init_payload.as_ref());
    ConnectionKey::from_hash(hasher.finish())
}

/// Computes the dedup identity of a subscription.
///
/// Identical `(options, request)` pairs map to the same key, so a [`Client`]
/// can serve them from one upstream.
///
/// [`Client`]: crate::Client
#[must_use]
pub fn subscription_key(options: &Options, request: &Request) -> SubscriptionKey {
    let mut hasher = KeyHasher::default();
    hasher.field(options.endpoint.as_bytes());
    hasher.field(options.transport.as_str().as_bytes());
    hasher.field(options.ws_subprotocol.as_str().as_bytes());
    hasher.field(options.sse_method.as_str().as_bytes());
    hasher.headers(&options.headers);
    hasher.json(options.init_payload.as_ref());
    hasher.field(request.query.as_bytes());
    hasher.field(request.operation_name.as_bytes());
    hasher.json(request.variables.as_ref());
    hasher.json(request.extensions.as_ref());
    SubscriptionKey::from_hash(hasher.finish())
}

// ============================================================================
// KeyHasher
// ============================================================================

/// Canonical field encoder over [`FxHasher`].
#[derive(Default)]
struct KeyHasher {
    inner: FxHasher,
}

impl KeyHasher {
    fn field(&mut self, bytes: &[u8]) {
        // Length prefix keeps "a\0" + "b" distinct from "a" + "\0b".
        self.inner.write_usize(bytes.len());
        self.inner.write(bytes);
        self.inner.write(SEP);
    }

    fn headers(&mut self, headers: &HeaderMap) {
        let mut pairs: Vec<(&str, &[u8])> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_bytes()))
            .collect();
        // Order across names is irrelevant; order within a name is not.
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        self.inner.write_usize(pairs.len());
        for (name, value) in pairs {
            self.field(name.as_bytes());
            self.field(value);
        }
        self.inner.write(SEP);
    }

    fn json(&mut self, value: Option<&Value>) {
        match value {
            // Value serialization cannot fail: keys are always strings.
            Some(value) => self.field(value.to_string().as_bytes()),
            None => self.field(b""),
        }
    }

    fn finish(&self) -> u64 {
        self.inner.finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
