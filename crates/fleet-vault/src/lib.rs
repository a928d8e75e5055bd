//! # fleet-vault
//!
//! Envelope encryption of provider credentials and permission coverage
//! evaluation for gpufleet.
//!
//! This crate provides:
//! - A local AEAD vault: a 256-bit master key wraps per-account data keys,
//!   which encrypt the JSON-serialized credential map (AES-256-GCM)
//! - Fail-closed decryption: any authentication-tag mismatch is a hard error
//! - Permission gap computation (`missing = required - granted`) and the
//!   derived account status

use thiserror::Error;

pub mod envelope;
pub mod permissions;

pub use envelope::Vault;
pub use permissions::{account_status, evaluate_permissions, PermissionReport};

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors that can occur during vault operations
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Master key error: {0}")]
    MasterKey(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// Covers tag mismatches, truncated blobs, and any other AEAD failure.
    /// Deliberately carries no plaintext-derived context.
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<VaultError> for fleet_core::Error {
    fn from(err: VaultError) -> Self {
        fleet_core::Error::credential(err.to_string())
    }
}
