//! Budget, scheduling, and reliability policy schemas

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Recurring window during which launches, starts, and inference are
/// refused for cost control.
///
/// Comparison is by minute-of-day in UTC; windows may wrap past midnight
/// (`start > end`), in which case the window runs from `start` on a listed
/// day into the following morning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopWindow {
    /// Days of week the window starts on (0 = Sunday .. 6 = Saturday)
    pub days: Vec<u8>,

    /// Window start, "HH:MM"
    pub start: String,

    /// Window end, "HH:MM"
    pub end: String,
}

impl StopWindow {
    /// Parse "HH:MM" into minute-of-day. Returns None on malformed input
    /// rather than failing the whole policy.
    fn minute_of_day(value: &str) -> Option<u32> {
        let (h, m) = value.split_once(':')?;
        let h: u32 = h.trim().parse().ok()?;
        let m: u32 = m.trim().parse().ok()?;
        if h > 23 || m > 59 {
            return None;
        }
        Some(h * 60 + m)
    }

    /// Check whether `now` falls inside this window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let (start, end) = match (
            Self::minute_of_day(&self.start),
            Self::minute_of_day(&self.end),
        ) {
            (Some(s), Some(e)) => (s, e),
            _ => return false,
        };

        let minute = now.hour() * 60 + now.minute();
        let day = now.weekday().num_days_from_sunday() as u8;
        let prev_day = (day + 6) % 7;

        if start <= end {
            self.days.contains(&day) && minute >= start && minute < end
        } else {
            // Wraps past midnight: the tail of the window belongs to the
            // day after a listed start day.
            (self.days.contains(&day) && minute >= start)
                || (self.days.contains(&prev_day) && minute < end)
        }
    }

    /// Human-readable form for error details
    pub fn describe(&self) -> String {
        format!("days {:?} {}-{}", self.days, self.start, self.end)
    }
}

/// Per-project budget policy. Consumed spend is derived by summing request
/// logs, not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    pub id: String,
    pub project_id: String,

    /// Hard cap on cumulative estimated spend, checked at admission time
    pub hard_spend_cap_usd: f64,

    /// Stop a running instance after this many idle minutes (0 disables)
    pub auto_stop_idle_minutes: u64,

    /// Fractions of the cap at which alerts fire (advisory)
    #[serde(default)]
    pub alert_thresholds: Vec<f64>,

    #[serde(default)]
    pub stop_windows: Vec<StopWindow>,
}

impl BudgetPolicy {
    /// Default policy auto-created for a project on first launch
    pub fn default_for_project(project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        Self {
            id: format!("bp-{}", project_id),
            project_id,
            hard_spend_cap_usd: 25.0,
            auto_stop_idle_minutes: 30,
            alert_thresholds: vec![0.5, 0.9],
            stop_windows: Vec::new(),
        }
    }

    /// First stop window containing `now`, if any
    pub fn active_stop_window(&self, now: DateTime<Utc>) -> Option<&StopWindow> {
        self.stop_windows.iter().find(|w| w.contains(now))
    }
}

/// Retry schedule for transient inference failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff, capped: `min(max, base * 2^attempt)`
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(32) as u64);
        exp.min(self.max_delay_ms)
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerPolicy {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before probing again
    pub reset_timeout_ms: u64,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Global reliability policy for inference dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityPolicy {
    /// Deadline for one inference attempt
    pub inference_timeout_ms: u64,

    /// Per-instance admission bound
    pub max_queue_depth_per_instance: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub circuit_breaker: BreakerPolicy,
}

impl Default for ReliabilityPolicy {
    fn default() -> Self {
        Self {
            inference_timeout_ms: 30_000,
            max_queue_depth_per_instance: 8,
            retry: RetryPolicy::default(),
            circuit_breaker: BreakerPolicy::default(),
        }
    }
}

/// Named inference parameter preset referenced by instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceProfile {
    pub id: String,
    pub name: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl InferenceProfile {
    /// Built-in presets ensured on first use
    pub fn defaults() -> Vec<InferenceProfile> {
        vec![
            InferenceProfile {
                id: "balanced".into(),
                name: "Balanced".into(),
                max_tokens: 512,
                temperature: 0.7,
            },
            InferenceProfile {
                id: "deterministic".into(),
                name: "Deterministic".into(),
                max_tokens: 512,
                temperature: 0.0,
            },
            InferenceProfile {
                id: "creative".into(),
                name: "Creative".into(),
                max_tokens: 1024,
                temperature: 1.0,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(weekday_date: (i32, u32, u32), hour: u32, minute: u32) -> DateTime<Utc> {
        let (y, m, d) = weekday_date;
        Utc.with_ymd_and_hms(y, m, d, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_stop_window_plain() {
        let window = StopWindow {
            days: vec![1], // Monday
            start: "09:00".into(),
            end: "17:00".into(),
        };
        // 2024-01-01 is a Monday
        assert!(window.contains(at((2024, 1, 1), 12, 0)));
        assert!(window.contains(at((2024, 1, 1), 9, 0)));
        assert!(!window.contains(at((2024, 1, 1), 17, 0)));
        assert!(!window.contains(at((2024, 1, 1), 8, 59)));
        // Tuesday is outside the window
        assert!(!window.contains(at((2024, 1, 2), 12, 0)));
    }

    #[test]
    fn test_stop_window_wraps_midnight() {
        let window = StopWindow {
            days: vec![1], // Monday night into Tuesday morning
            start: "22:00".into(),
            end: "06:00".into(),
        };
        assert!(window.contains(at((2024, 1, 1), 23, 30)));
        assert!(window.contains(at((2024, 1, 2), 5, 59)));
        assert!(!window.contains(at((2024, 1, 2), 6, 0)));
        assert!(!window.contains(at((2024, 1, 1), 21, 59)));
        // Wednesday morning is not covered by a Monday start
        assert!(!window.contains(at((2024, 1, 3), 5, 0)));
    }

    #[test]
    fn test_stop_window_malformed_never_matches() {
        let window = StopWindow {
            days: vec![0, 1, 2, 3, 4, 5, 6],
            start: "25:00".into(),
            end: "26:00".into(),
        };
        assert!(!window.contains(Utc::now()));
    }

    #[test]
    fn test_backoff_caps() {
        let retry = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
        };
        assert_eq!(retry.backoff_ms(0), 250);
        assert_eq!(retry.backoff_ms(1), 500);
        assert_eq!(retry.backoff_ms(2), 1_000);
        assert_eq!(retry.backoff_ms(10), 4_000);
    }

    #[test]
    fn test_default_policy_per_project() {
        let policy = BudgetPolicy::default_for_project("alpha");
        assert_eq!(policy.id, "bp-alpha");
        assert_eq!(policy.project_id, "alpha");
        assert!(policy.hard_spend_cap_usd > 0.0);
    }

    #[test]
    fn test_reliability_defaults() {
        let policy = ReliabilityPolicy::default();
        assert_eq!(policy.max_queue_depth_per_instance, 8);
        assert_eq!(policy.circuit_breaker.failure_threshold, 3);
    }
}
