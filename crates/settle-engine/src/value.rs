//! The engine value model.
//!
//! Every fulfillment value, rejection reason, and zone property is a
//! [`Value`]. The model is deliberately small: the engine never interprets
//! values beyond the two *thenable* variants, which re-enter the resolution
//! procedure when a promise is resolved with one.
//!
//! - [`Value::Promise`] references a promise owned by the same engine.
//! - [`Value::Thenable`] references a registered foreign thenable: a one-shot
//!   adoption callback standing in for an arbitrary object with a callable
//!   `then`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::promise::PromiseHandle;

/// Opaque handle to a registered foreign thenable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThenableHandle(pub u32);

impl fmt::Display for ThenableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thenable:{}", self.0)
    }
}

/// A dynamic value flowing through the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value (the default fulfillment of `follow`).
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// String.
    Str(String),
    /// Ordered list (the shape of `all` results).
    List(Vec<Value>),
    /// An error reason.
    Error(ErrorReason),
    /// A core promise owned by the same engine.
    Promise(PromiseHandle),
    /// A registered foreign thenable.
    Thenable(ThenableHandle),
}

impl Value {
    /// Returns `true` when resolving a promise with this value re-enters the
    /// resolution procedure instead of settling directly.
    pub fn is_thenable(&self) -> bool {
        matches!(self, Self::Promise(_) | Self::Thenable(_))
    }

    /// Builds an error value with the given name and message.
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorReason::new(name, message))
    }

    /// Builds a `TypeError`-named error value.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::error("TypeError", message)
    }

    /// The error name when this value is an error, else `None`.
    pub fn error_name(&self) -> Option<&str> {
        match self {
            Self::Error(reason) => Some(&reason.name),
            _ => None,
        }
    }

    /// A short type tag for display and events.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Error(_) => "error",
            Self::Promise(_) => "promise",
            Self::Thenable(_) => "thenable",
        }
    }
}

/// A rejection reason as plain data.
///
/// `stack` is filled in lazily by the long-stack renderer when the debug
/// feature is enabled; `errors` carries the per-input reasons of an
/// aggregate rejection (`any` with no fulfilled input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReason {
    /// Error class name (`"TypeError"`, `"RangeError"`, ...).
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Rendered long stack, when captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Component reasons of an aggregate rejection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

impl ErrorReason {
    /// Creates a reason with no stack and no component errors.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            errors: Vec::new(),
        }
    }

    /// Creates an `AggregateError`-named reason over component reasons.
    pub fn aggregate(errors: Vec<Value>) -> Self {
        Self {
            name: "AggregateError".to_string(),
            message: "all promises were rejected".to_string(),
            stack: None,
            errors,
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}
