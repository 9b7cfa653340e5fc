//! GraphQL request and result types.
//!
//! # Format
//!
//! A [`Request`] serializes to the payload shared by every transport:
//!
//! ```json
//! {
//!   "query": "subscription { a }",
//!   "variables": { ... },
//!   "operationName": "A",
//!   "extensions": { ... }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

// ============================================================================
// Request
// ============================================================================

/// A GraphQL operation to execute as a subscription.
///
/// Immutable once passed to a `subscribe` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Operation document.
    pub query: String,

    /// Operation variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    /// Name of the operation to run when the document holds several.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation_name: String,

    /// Protocol extensions (persisted queries and the like).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl Request {
    /// Creates a request for the given document.
    #[inline]
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Sets the variables.
    #[inline]
    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Sets the operation name.
    #[inline]
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = name.into();
        self
    }

    /// Sets the extensions.
    #[inline]
    #[must_use]
    pub fn with_extensions(mut self, extensions: Value) -> Self {
        self.extensions = Some(extensions);
        self
    }
}

// ============================================================================
// ExecutionResult
// ============================================================================

/// One result produced by the upstream server.
///
/// `data` is kept as raw JSON; decoding it is the caller's business.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Raw `data` member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,

    /// Field errors reported alongside data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    /// Response extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl ExecutionResult {
    /// Returns the raw `data` JSON, or `""` when absent.
    #[inline]
    #[must_use]
    pub fn data_str(&self) -> &str {
        self.data.as_deref().map(RawValue::get).unwrap_or_default()
    }

    /// Returns `true` if the server reported field errors.
    #[inline]
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ============================================================================
// GraphQLError
// ============================================================================

/// A GraphQL error as defined by the GraphQL specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// Human readable message.
    pub message: String,

    /// Response path of the failing field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,

    /// Document locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,

    /// Error extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// Creates an error with only a message.
    #[inline]
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Line/column location in the operation document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

// ============================================================================
// Tests
// ============================================================================
