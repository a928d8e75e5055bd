//! Per-instance circuit breaker transitions
//!
//! State machine:
//! - `closed` (initial): requests pass; failures increment the count
//! - `closed -> open` once the count reaches the failure threshold;
//!   `open_until = now + reset_timeout`
//! - `open`: requests are refused without a provider call (the engine then
//!   tries the fallback route)
//! - `open -> half-open` automatically, the first time an admission check
//!   observes `now >= open_until`
//! - `half-open -> closed` on the next success (count resets)
//! - `half-open -> open` on the next failure, with a fresh `open_until`
//!
//! Transitions run inside the store's keyed entry lock with no await
//! points, so interleaved requests observe a consistent machine.

use chrono::{DateTime, Duration, Utc};
use fleet_core::policy::BreakerPolicy;
use fleet_core::types::CircuitState;
use fleet_state::StateStore;
use tracing::{info, warn};

/// Outcome of an admission check against an instance's breaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// Request may proceed to dispatch
    Allow,
    /// Circuit is open; refuse or reroute
    Refuse { open_until: DateTime<Utc> },
}

/// Check whether a request may pass the breaker, applying the timed
/// `open -> half-open` transition as a side effect.
pub fn admit(store: &StateStore, instance_id: &str, now: DateTime<Utc>) -> Admission {
    store.with_circuit_breaker(instance_id, |breaker| match breaker.state {
        CircuitState::Closed | CircuitState::HalfOpen => Admission::Allow,
        CircuitState::Open => {
            let open_until = breaker.open_until.unwrap_or(now);
            if now >= open_until {
                info!(instance = instance_id, "circuit half-open, probing instance");
                breaker.state = CircuitState::HalfOpen;
                Admission::Allow
            } else {
                Admission::Refuse { open_until }
            }
        }
    })
}

/// Record a successful call: half-open circuits close, failure count resets
pub fn record_success(store: &StateStore, instance_id: &str) {
    store.with_circuit_breaker(instance_id, |breaker| {
        if breaker.state == CircuitState::HalfOpen {
            info!(instance = instance_id, "circuit closed after successful probe");
        }
        breaker.state = CircuitState::Closed;
        breaker.failure_count = 0;
        breaker.opened_at = None;
        breaker.open_until = None;
        breaker.last_error_code = None;
    });
}

/// Record a terminal dispatch failure, returning the resulting state
pub fn record_failure(
    store: &StateStore,
    instance_id: &str,
    policy: &BreakerPolicy,
    error_code: &str,
    now: DateTime<Utc>,
) -> CircuitState {
    let reset = Duration::milliseconds(policy.reset_timeout_ms as i64);
    store.with_circuit_breaker(instance_id, |breaker| {
        breaker.last_error_code = Some(error_code.to_string());
        match breaker.state {
            CircuitState::Closed => {
                breaker.failure_count += 1;
                if breaker.failure_count >= policy.failure_threshold {
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(now);
                    breaker.open_until = Some(now + reset);
                    warn!(
                        instance = instance_id,
                        failures = breaker.failure_count,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed; re-open with a fresh window
                breaker.state = CircuitState::Open;
                breaker.opened_at = Some(now);
                breaker.open_until = Some(now + reset);
                warn!(instance = instance_id, "circuit re-opened after failed probe");
            }
            CircuitState::Open => {
                breaker.failure_count += 1;
            }
        }
        breaker.state
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: 3,
            reset_timeout_ms: 30_000,
        }
    }

    #[test]
    fn test_closed_until_threshold() {
        let store = StateStore::new();
        let now = Utc::now();

        assert_eq!(record_failure(&store, "gpu-1", &policy(), "NETWORK", now), CircuitState::Closed);
        assert_eq!(record_failure(&store, "gpu-1", &policy(), "NETWORK", now), CircuitState::Closed);
        assert_eq!(admit(&store, "gpu-1", now), Admission::Allow);

        // Third failure opens the circuit
        assert_eq!(record_failure(&store, "gpu-1", &policy(), "NETWORK", now), CircuitState::Open);
        let state = store.circuit_breaker("gpu-1");
        assert_eq!(state.failure_count, 3);
        assert_eq!(state.last_error_code.as_deref(), Some("NETWORK"));
        assert!(matches!(admit(&store, "gpu-1", now), Admission::Refuse { .. }));
    }

    #[test]
    fn test_open_to_half_open_after_reset() {
        let store = StateStore::new();
        let now = Utc::now();
        for _ in 0..3 {
            record_failure(&store, "gpu-1", &policy(), "NETWORK", now);
        }

        // Still refused inside the window
        let just_before = now + Duration::milliseconds(29_999);
        assert!(matches!(admit(&store, "gpu-1", just_before), Admission::Refuse { .. }));

        // First check past open_until transitions to half-open and allows
        let after = now + Duration::milliseconds(30_000);
        assert_eq!(admit(&store, "gpu-1", after), Admission::Allow);
        assert_eq!(store.circuit_breaker("gpu-1").state, CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_on_success() {
        let store = StateStore::new();
        let now = Utc::now();
        for _ in 0..3 {
            record_failure(&store, "gpu-1", &policy(), "NETWORK", now);
        }
        admit(&store, "gpu-1", now + Duration::milliseconds(31_000));

        record_success(&store, "gpu-1");
        let state = store.circuit_breaker("gpu-1");
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 0);
        assert!(state.open_until.is_none());
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let store = StateStore::new();
        let now = Utc::now();
        for _ in 0..3 {
            record_failure(&store, "gpu-1", &policy(), "NETWORK", now);
        }
        let probe_time = now + Duration::milliseconds(31_000);
        admit(&store, "gpu-1", probe_time);

        let state = record_failure(&store, "gpu-1", &policy(), "TIMEOUT", probe_time);
        assert_eq!(state, CircuitState::Open);
        let breaker = store.circuit_breaker("gpu-1");
        // Fresh window from the probe failure, not the original opening
        assert_eq!(breaker.open_until, Some(probe_time + Duration::milliseconds(30_000)));
    }

    #[test]
    fn test_success_resets_accumulated_failures() {
        let store = StateStore::new();
        let now = Utc::now();
        record_failure(&store, "gpu-1", &policy(), "NETWORK", now);
        record_failure(&store, "gpu-1", &policy(), "NETWORK", now);
        record_success(&store, "gpu-1");
        // Counter restarts; two more failures stay closed
        record_failure(&store, "gpu-1", &policy(), "NETWORK", now);
        record_failure(&store, "gpu-1", &policy(), "NETWORK", now);
        assert_eq!(store.circuit_breaker("gpu-1").state, CircuitState::Closed);
    }
}
