//! # fleet-core
//!
//! Core types, policies, and error handling for gpufleet - a GPU fleet
//! control plane over heterogeneous compute providers.
//!
//! This crate provides the foundational data structures and interfaces that
//! are shared across all other gpufleet components. It includes:
//!
//! - Instance and provider account records with their lifecycle states
//! - Budget, scheduling, and reliability policy schemas
//! - Structured wire errors exchanged with provider runtimes
//! - Immutable request-log and audit-log record types
//! - A unified error type with HTTP status and retry classification

pub mod error;
pub mod policy;
pub mod records;
pub mod types;

// Re-export commonly used types at the crate root
pub use error::{Error, Result, WireError};
pub use policy::{
    BudgetPolicy, BreakerPolicy, InferenceProfile, ReliabilityPolicy, RetryPolicy, StopWindow,
};
pub use records::{AuditLogEntry, InferenceRequestLog};
pub use types::{
    AccountStatus, CircuitBreakerState, CircuitState, CredentialEnvelope, CredentialMap,
    InferenceOutcome, InferencePayload, Instance, InstanceHealth, InstanceStatus, KmsState,
    LaunchSpec, PermissionSet, ProviderAccount, TokenPolicy,
};
