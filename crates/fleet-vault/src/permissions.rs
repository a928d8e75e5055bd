//! Permission coverage evaluation for provider accounts

use chrono::Utc;
use fleet_core::{AccountStatus, PermissionSet};

/// Result of evaluating granted scopes against a provider's requirements
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionReport {
    pub required: Vec<String>,
    pub granted: Vec<String>,
    pub missing: Vec<String>,
}

impl PermissionReport {
    /// Check whether all required scopes are granted
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Convert into the stored permission set, stamping the verification time
    pub fn into_permission_set(self) -> PermissionSet {
        PermissionSet {
            required: self.required,
            granted: self.granted,
            missing: self.missing,
            verified_at: Some(Utc::now()),
        }
    }
}

/// Compute `missing = required - granted`, preserving required order
pub fn evaluate_permissions(required: &[String], granted: &[String]) -> PermissionReport {
    let missing = required
        .iter()
        .filter(|scope| !granted.contains(scope))
        .cloned()
        .collect();

    PermissionReport {
        required: required.to_vec(),
        granted: granted.to_vec(),
        missing,
    }
}

/// Derive the account status from its permission coverage
pub fn account_status(report: &PermissionReport) -> AccountStatus {
    if report.is_complete() {
        AccountStatus::Valid
    } else {
        AccountStatus::PermissionsMissing
    }
}
