//! Error handling for gpufleet
//!
//! Provides the unified error type used across all gpufleet components, plus
//! the structured wire error format that provider runtimes speak.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type alias for gpufleet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error returned by provider runtimes and transports.
///
/// Every adapter failure path produces one of these instead of an
/// unstructured exception, so the reliability engine can make retry
/// decisions without provider-specific knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Stable machine-readable code (e.g. `RUNTIME_NOT_READY`)
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Structured context for the caller
    #[serde(default)]
    pub details: serde_json::Value,

    /// Whether the caller may retry the operation
    pub retriable: bool,

    /// When the error was produced
    pub timestamp: DateTime<Utc>,
}

impl WireError {
    /// Create a non-retriable wire error
    pub fn terminal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: serde_json::Value::Null,
            retriable: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a retriable wire error
    pub fn retriable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retriable: true,
            ..Self::terminal(code, message)
        }
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for WireError {}

/// Unified error type for gpufleet
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad request parameters (unknown region/GPU type, missing fields)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid provider credentials
    #[error("Credential error: {0}")]
    Credential(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Hard spend cap reached for a budget policy
    #[error("Budget cap reached for policy {policy_id}: spent {spent_usd:.4} of {cap_usd:.4} USD")]
    Budget {
        policy_id: String,
        spent_usd: f64,
        cap_usd: f64,
    },

    /// A scheduled stop window is active for the instance's policy
    #[error("Stop window active for policy {policy_id}: {window}")]
    Scheduling { policy_id: String, window: String },

    /// Per-instance queue depth bound reached
    #[error("Queue full for instance {instance_id}: depth {depth} at limit {limit}")]
    Capacity {
        instance_id: String,
        depth: usize,
        limit: usize,
    },

    /// Circuit breaker open and no fallback instance available
    #[error("Circuit open for instance {instance_id} until {open_until}")]
    CircuitOpen {
        instance_id: String,
        open_until: DateTime<Utc>,
    },

    /// Provider transport failure (network, 5xx, runtime error)
    #[error("Provider transport error: {0}")]
    Transport(WireError),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a credential error
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code surfaced to API callers
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION",
            Error::Credential(_) => "CREDENTIAL",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Budget { .. } => "BUDGET_CAP_REACHED",
            Error::Scheduling { .. } => "STOP_WINDOW_ACTIVE",
            Error::Capacity { .. } => "QUEUE_FULL",
            Error::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Error::Transport(_) => "PROVIDER_TRANSPORT",
            Error::Timeout(_) => "TIMEOUT",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Check if this error is retriable by the reliability engine
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Transport(wire) => wire.retriable,
            Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// Structured details for API responses, enough to act on without log
    /// access (policy ids, thresholds, queue depth).
    pub fn details(&self) -> serde_json::Value {
        match self {
            Error::Budget {
                policy_id,
                spent_usd,
                cap_usd,
            } => serde_json::json!({
                "policy_id": policy_id,
                "spent_usd": spent_usd,
                "cap_usd": cap_usd,
            }),
            Error::Scheduling { policy_id, window } => serde_json::json!({
                "policy_id": policy_id,
                "window": window,
            }),
            Error::Capacity {
                instance_id,
                depth,
                limit,
            } => serde_json::json!({
                "instance_id": instance_id,
                "depth": depth,
                "limit": limit,
            }),
            Error::CircuitOpen {
                instance_id,
                open_until,
            } => serde_json::json!({
                "instance_id": instance_id,
                "open_until": open_until,
            }),
            Error::Transport(wire) => serde_json::json!({
                "code": wire.code,
                "retriable": wire.retriable,
                "details": wire.details,
            }),
            _ => serde_json::Value::Null,
        }
    }

    /// Convert to HTTP status code for the gateway
    pub fn to_http_status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::Credential(_) => 400,
            Error::Scheduling { .. } | Error::CircuitOpen { .. } => 403,
            Error::NotFound(_) => 404,
            Error::Budget { .. } | Error::Capacity { .. } => 429,
            Error::Transport(_) => 502,
            Error::Timeout(_) => 504,
            _ => 500,
        }
    }
}

impl From<WireError> for Error {
    fn from(wire: WireError) -> Self {
        Error::Transport(wire)
    }
}
