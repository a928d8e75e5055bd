//! Persisted snapshot document
//!
//! Everything lives under the single `gpu` namespace so the document can
//! coexist with other top-level namespaces in a shared config file.

use crate::observability::ObservabilitySnapshot;
use fleet_core::{
    AuditLogEntry, BudgetPolicy, CircuitBreakerState, InferenceProfile, InferenceRequestLog,
    Instance, KmsState, ProviderAccount, ReliabilityPolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level persisted document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuDocument {
    #[serde(default)]
    pub gpu: GpuNamespace,
}

/// The `gpu` namespace of the persisted document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuNamespace {
    /// Per-provider settings blob, preserved round-trip
    #[serde(default)]
    pub providers: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub provider_accounts: Vec<ProviderAccount>,

    #[serde(default)]
    pub instances: Vec<Instance>,

    /// Primary routing: project id -> instance id
    #[serde(default)]
    pub routing: HashMap<String, String>,

    #[serde(default)]
    pub inference_profiles: HashMap<String, InferenceProfile>,

    #[serde(default)]
    pub inference_request_logs: Vec<InferenceRequestLog>,

    #[serde(default)]
    pub budget_policies: HashMap<String, BudgetPolicy>,

    #[serde(default)]
    pub reliability: ReliabilityPolicy,

    #[serde(default)]
    pub circuit_breakers: HashMap<String, CircuitBreakerState>,

    /// Fallback routing: project id -> instance id
    #[serde(default)]
    pub fallback_routes: HashMap<String, String>,

    #[serde(default)]
    pub observability: ObservabilitySnapshot,

    #[serde(default)]
    pub audit_logs: Vec<AuditLogEntry>,

    #[serde(default)]
    pub kms: Option<KmsState>,
}
