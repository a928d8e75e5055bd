//! Running observability counters and the error taxonomy classifier
//!
//! Counters are updated atomically per event and never recomputed from the
//! request logs; spend is held in integer micro-USD so it can live in an
//! atomic.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

const MICRO: f64 = 1_000_000.0;

/// Taxonomy bucket for provider errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Auth,
    Quota,
    Capacity,
    Network,
    Runtime,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Auth => "auth",
            ErrorClass::Quota => "quota",
            ErrorClass::Capacity => "capacity",
            ErrorClass::Network => "network",
            ErrorClass::Runtime => "runtime",
        }
    }
}

/// Classify a provider error into the taxonomy by keyword matching over
/// `(code, message)`. Pure function; the buckets are checked in order of
/// specificity.
pub fn classify_error(code: &str, message: &str) -> ErrorClass {
    let haystack = format!("{} {}", code, message).to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| haystack.contains(k));

    if matches(&[
        "auth",
        "credential",
        "permission",
        "forbidden",
        "unauthorized",
        "denied",
        "token",
        "api key",
        "401",
        "403",
    ]) {
        ErrorClass::Auth
    } else if matches(&["quota", "rate limit", "billing", "budget", "429"]) {
        ErrorClass::Quota
    } else if matches(&[
        "capacity",
        "queue",
        "insufficient",
        "unavailable",
        "exhausted",
        "no running instance",
    ]) {
        ErrorClass::Capacity
    } else if matches(&[
        "timeout",
        "network",
        "connection",
        "transport",
        "unreachable",
        "reset",
        "dns",
        "502",
        "503",
    ]) {
        ErrorClass::Network
    } else {
        ErrorClass::Runtime
    }
}

#[derive(Debug, Default)]
struct ProvisioningCounters {
    attempts: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    time_to_ready_ms_sum: AtomicU64,
    samples: AtomicU64,
}

#[derive(Debug, Default)]
struct InferenceCounters {
    total: AtomicU64,
    failed: AtomicU64,
    latency_ms_sum: AtomicU64,
    samples: AtomicU64,
    spend_micro_usd: AtomicU64,
}

#[derive(Debug, Default)]
struct TaxonomyCounters {
    auth: AtomicU64,
    quota: AtomicU64,
    capacity: AtomicU64,
    network: AtomicU64,
    runtime: AtomicU64,
}

impl TaxonomyCounters {
    fn bump(&self, class: ErrorClass) {
        let counter = match class {
            ErrorClass::Auth => &self.auth,
            ErrorClass::Quota => &self.quota,
            ErrorClass::Capacity => &self.capacity,
            ErrorClass::Network => &self.network,
            ErrorClass::Runtime => &self.runtime,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Running counters for provisioning, inference, and per-provider errors
#[derive(Debug, Default)]
pub struct Observability {
    provisioning: ProvisioningCounters,
    inference: InferenceCounters,
    provider_errors: DashMap<String, TaxonomyCounters>,
}

impl Observability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_provisioning_attempt(&self) {
        self.provisioning.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provisioning_success(&self, time_to_ready_ms: u64) {
        self.provisioning.success.fetch_add(1, Ordering::Relaxed);
        self.provisioning
            .time_to_ready_ms_sum
            .fetch_add(time_to_ready_ms, Ordering::Relaxed);
        self.provisioning.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provisioning_failure(&self) {
        self.provisioning.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference(&self, ok: bool, latency_ms: u64, cost_estimate_usd: f64) {
        self.inference.total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.inference.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inference
            .latency_ms_sum
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.inference.samples.fetch_add(1, Ordering::Relaxed);
        self.inference
            .spend_micro_usd
            .fetch_add((cost_estimate_usd * MICRO) as u64, Ordering::Relaxed);
    }

    pub fn record_provider_error(&self, provider_id: &str, class: ErrorClass) {
        self.provider_errors
            .entry(provider_id.to_string())
            .or_default()
            .bump(class);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ObservabilitySnapshot {
            provisioning: ProvisioningSnapshot {
                attempts: load(&self.provisioning.attempts),
                success: load(&self.provisioning.success),
                failed: load(&self.provisioning.failed),
                time_to_ready_ms_sum: load(&self.provisioning.time_to_ready_ms_sum),
                samples: load(&self.provisioning.samples),
            },
            inference: InferenceSnapshot {
                total: load(&self.inference.total),
                failed: load(&self.inference.failed),
                latency_ms_sum: load(&self.inference.latency_ms_sum),
                samples: load(&self.inference.samples),
                estimated_spend_usd: load(&self.inference.spend_micro_usd) as f64 / MICRO,
            },
            provider_errors: self
                .provider_errors
                .iter()
                .map(|entry| {
                    (
                        entry.key().clone(),
                        TaxonomySnapshot {
                            auth: load(&entry.auth),
                            quota: load(&entry.quota),
                            capacity: load(&entry.capacity),
                            network: load(&entry.network),
                            runtime: load(&entry.runtime),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Restore counters from a persisted snapshot
    pub fn restore(&self, snapshot: &ObservabilitySnapshot) {
        let set = |c: &AtomicU64, v: u64| c.store(v, Ordering::Relaxed);
        set(&self.provisioning.attempts, snapshot.provisioning.attempts);
        set(&self.provisioning.success, snapshot.provisioning.success);
        set(&self.provisioning.failed, snapshot.provisioning.failed);
        set(
            &self.provisioning.time_to_ready_ms_sum,
            snapshot.provisioning.time_to_ready_ms_sum,
        );
        set(&self.provisioning.samples, snapshot.provisioning.samples);
        set(&self.inference.total, snapshot.inference.total);
        set(&self.inference.failed, snapshot.inference.failed);
        set(&self.inference.latency_ms_sum, snapshot.inference.latency_ms_sum);
        set(&self.inference.samples, snapshot.inference.samples);
        set(
            &self.inference.spend_micro_usd,
            (snapshot.inference.estimated_spend_usd * MICRO) as u64,
        );
        for (provider, counts) in &snapshot.provider_errors {
            let entry = self.provider_errors.entry(provider.clone()).or_default();
            set(&entry.auth, counts.auth);
            set(&entry.quota, counts.quota);
            set(&entry.capacity, counts.capacity);
            set(&entry.network, counts.network);
            set(&entry.runtime, counts.runtime);
        }
    }
}

/// Serializable copy of the provisioning counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningSnapshot {
    pub attempts: u64,
    pub success: u64,
    pub failed: u64,
    pub time_to_ready_ms_sum: u64,
    pub samples: u64,
}

/// Serializable copy of the inference counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceSnapshot {
    pub total: u64,
    pub failed: u64,
    pub latency_ms_sum: u64,
    pub samples: u64,
    pub estimated_spend_usd: f64,
}

/// Serializable copy of a provider's error taxonomy counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomySnapshot {
    pub auth: u64,
    pub quota: u64,
    pub capacity: u64,
    pub network: u64,
    pub runtime: u64,
}

/// Point-in-time copy of all observability counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub provisioning: ProvisioningSnapshot,
    pub inference: InferenceSnapshot,
    #[serde(default)]
    pub provider_errors: HashMap<String, TaxonomySnapshot>,
}

impl ObservabilitySnapshot {
    /// Inference success rate over all recorded requests
    pub fn success_rate(&self) -> f64 {
        if self.inference.total == 0 {
            return 1.0;
        }
        1.0 - (self.inference.failed as f64 / self.inference.total as f64)
    }

    /// Mean observed inference latency
    pub fn avg_latency_ms(&self) -> f64 {
        if self.inference.samples == 0 {
            return 0.0;
        }
        self.inference.latency_ms_sum as f64 / self.inference.samples as f64
    }
}
