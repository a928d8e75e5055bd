//! # fleet-state
//!
//! State store for gpufleet: instances, provider accounts, routing tables,
//! budget and reliability policies, request logs, the audit ring buffer,
//! and the running observability counters.
//!
//! This crate provides:
//! - An in-memory keyed store safe for concurrent access from the gateway
//!   and the reliability engine (no lock is ever held across an await)
//! - Snapshot persistence to a single JSON document under the `gpu`
//!   namespace, written atomically (temp file + rename)
//! - Running counters updated atomically per event, never recomputed from
//!   logs, plus the pure error-taxonomy classifier

use thiserror::Error;

pub mod observability;
pub mod snapshot;
pub mod store;

pub use observability::{classify_error, ErrorClass, Observability, ObservabilitySnapshot};
pub use snapshot::{GpuDocument, GpuNamespace};
pub use store::StateStore;

/// Result type for state operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur during state operations
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StateError> for fleet_core::Error {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Serialization(e) => fleet_core::Error::Serialization(e),
            StateError::Io(e) => fleet_core::Error::Io(e),
            StateError::Store(msg) => fleet_core::Error::internal(msg),
        }
    }
}
