//! Budget and scheduling guard
//!
//! Pre-launch cost estimation from a static rate table, runtime spend caps
//! derived from request logs, stop-window enforcement, and the idle
//! auto-shutdown sweep.

use chrono::{DateTime, Duration, Utc};
use fleet_core::types::{InstanceHealth, InstanceStatus};
use fleet_core::{BudgetPolicy, Error, Result};
use fleet_state::StateStore;
use tracing::info;

/// Static `(gpu type) -> USD/hr` table, scaled by GPU count
const HOURLY_RATES_USD: &[(&str, f64)] = &[
    ("T4", 0.35),
    ("L4", 0.60),
    ("A10", 0.75),
    ("A10G", 0.80),
    ("A4000", 0.45),
    ("A5000", 0.65),
    ("A6000", 0.90),
    ("RTX4090", 0.70),
    ("A100", 2.10),
    ("H100", 4.25),
];

const DEFAULT_HOURLY_RATE_USD: f64 = 1.00;

/// Hourly rate for one GPU of the given type
pub fn hourly_rate_usd(gpu_type: &str) -> f64 {
    HOURLY_RATES_USD
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(gpu_type))
        .map(|(_, rate)| *rate)
        .unwrap_or(DEFAULT_HOURLY_RATE_USD)
}

/// Estimated hourly cost of an instance
pub fn estimate_hourly_cost_usd(gpu_type: &str, gpu_count: u32) -> f64 {
    hourly_rate_usd(gpu_type) * gpu_count.max(1) as f64
}

/// Estimated cost of one inference request, prorated from the hourly rate
/// by observed latency
pub fn request_cost_estimate_usd(gpu_type: &str, gpu_count: u32, latency_ms: u64) -> f64 {
    estimate_hourly_cost_usd(gpu_type, gpu_count) * latency_ms as f64 / 3_600_000.0
}

/// Pre-launch budget check. Runs before any provider call; returns the
/// estimate on success so callers can surface it.
pub fn check_launch_budget(policy: &BudgetPolicy, gpu_type: &str, gpu_count: u32) -> Result<f64> {
    let estimate = estimate_hourly_cost_usd(gpu_type, gpu_count);
    if estimate > policy.hard_spend_cap_usd {
        return Err(Error::Budget {
            policy_id: policy.id.clone(),
            spent_usd: estimate,
            cap_usd: policy.hard_spend_cap_usd,
        });
    }
    Ok(estimate)
}

/// Refuse while `now` falls inside any of the policy's stop windows
pub fn check_stop_window(policy: &BudgetPolicy, now: DateTime<Utc>) -> Result<()> {
    if let Some(window) = policy.active_stop_window(now) {
        return Err(Error::Scheduling {
            policy_id: policy.id.clone(),
            window: window.describe(),
        });
    }
    Ok(())
}

/// Runtime spend cap: cumulative estimated spend for the policy must stay
/// below the hard cap at admission time.
pub fn check_spend_cap(store: &StateStore, policy: &BudgetPolicy) -> Result<()> {
    let spent = store.spend_for_policy(&policy.id);
    if spent >= policy.hard_spend_cap_usd {
        return Err(Error::Budget {
            policy_id: policy.id.clone(),
            spent_usd: spent,
            cap_usd: policy.hard_spend_cap_usd,
        });
    }
    Ok(())
}

/// Stop running instances idle beyond their policy's threshold. Returns
/// the stopped instance ids. The transition is applied locally; there is
/// no provider-side reconciliation to race against.
pub fn sweep_idle(store: &StateStore, now: DateTime<Utc>) -> Vec<String> {
    let mut stopped = Vec::new();
    for instance in store.list_instances() {
        if instance.status != InstanceStatus::Running {
            continue;
        }
        let policy = store.policy_for_instance(&instance);
        if policy.auto_stop_idle_minutes == 0 {
            continue;
        }
        let cutoff = now - Duration::minutes(policy.auto_stop_idle_minutes as i64);
        let last_seen = instance.last_activity_at.unwrap_or(instance.created_at);
        if last_seen < cutoff {
            store.update_instance(&instance.id, |i| {
                i.status = InstanceStatus::Stopped;
                i.health = InstanceHealth::Idle;
                i.updated_at = now;
            });
            info!(
                instance = %instance.id,
                idle_minutes = policy.auto_stop_idle_minutes,
                "auto-stopped idle instance"
            );
            store.push_audit(
                "instance.auto_stop",
                serde_json::json!({
                    "instance_id": instance.id,
                    "policy_id": policy.id,
                    "idle_minutes": policy.auto_stop_idle_minutes,
                }),
            );
            stopped.push(instance.id);
        }
    }
    stopped
}
