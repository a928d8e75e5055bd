//! Immutable append-only record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one inference attempt. Append-only; spend and observability
/// aggregates are derived from these records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequestLog {
    pub id: String,
    pub instance_id: String,
    pub project_id: String,
    pub budget_policy_id: Option<String>,
    pub model: String,
    pub prompt_chars: usize,
    pub tokens_estimate: u64,
    pub latency_ms: u64,
    pub cost_estimate_usd: f64,
    pub ok: bool,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InferenceRequestLog {
    /// Start a log record for an attempt against `instance_id`
    pub fn new(instance_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: format!("req-{}", Uuid::new_v4()),
            instance_id: instance_id.into(),
            project_id: project_id.into(),
            budget_policy_id: None,
            model: String::new(),
            prompt_chars: 0,
            tokens_estimate: 0,
            latency_ms: 0,
            cost_estimate_usd: 0.0,
            ok: false,
            error_code: None,
            created_at: Utc::now(),
        }
    }
}

/// One entry in the audit trail. The store keeps a capped ring buffer of
/// these, oldest dropped first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(action: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            details,
            created_at: Utc::now(),
        }
    }
}
