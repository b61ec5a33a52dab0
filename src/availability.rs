//! Integration availability tracking.
//!
//! After a sync fails because the upstream system rate-limited us or could not
//! be reached, the integration is put on a cooldown. New triggers for that kind
//! are refused with a retry hint until the cooldown has elapsed.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::{Rng, thread_rng};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::AvailabilityConfig;
use crate::models::sync_job::JobKind;

/// Per-kind cooldown state
pub struct AvailabilityTracker {
    policy: AvailabilityConfig,
    blocked_until: Mutex<HashMap<JobKind, Instant>>,
}

impl AvailabilityTracker {
    pub fn new(policy: AvailabilityConfig) -> Self {
        Self {
            policy,
            blocked_until: Mutex::new(HashMap::new()),
        }
    }

    /// Cooldown for an upstream hint: the hint if present, otherwise the
    /// configured default, capped at the maximum and jittered.
    pub fn cooldown_for(&self, retry_hint_secs: Option<u64>) -> Duration {
        let max_seconds = self.policy.max_cooldown_seconds as f64;
        let base = retry_hint_secs
            .unwrap_or(self.policy.default_cooldown_seconds)
            .max(1) as f64;
        let base = base.min(max_seconds);

        let jitter_factor = self.policy.jitter_factor;
        let jittered = if jitter_factor > 0.0 {
            base * (1.0 + thread_rng().gen_range(-jitter_factor..=jitter_factor))
        } else {
            base
        };

        Duration::from_secs_f64(jittered.clamp(0.0, max_seconds))
    }

    /// Put `kind` on cooldown. Returns the cooldown applied.
    pub fn mark_unavailable(&self, kind: JobKind, retry_hint_secs: Option<u64>) -> Duration {
        let cooldown = self.cooldown_for(retry_hint_secs);
        let until = Instant::now() + cooldown;

        let mut blocked = self.blocked_until.lock().unwrap_or_else(PoisonError::into_inner);
        // Never shorten an existing, longer cooldown
        let entry = blocked.entry(kind).or_insert(until);
        if *entry < until {
            *entry = until;
        }

        warn!(
            job_kind = %kind,
            cooldown_secs = cooldown.as_secs_f64(),
            "Integration marked unavailable"
        );
        cooldown
    }

    /// Clear any cooldown for `kind`, e.g. after a successful sync.
    pub fn mark_available(&self, kind: JobKind) {
        let mut blocked = self.blocked_until.lock().unwrap_or_else(PoisonError::into_inner);
        if blocked.remove(&kind).is_some() {
            info!(job_kind = %kind, "Integration available again");
        }
    }

    /// Remaining cooldown in whole seconds (rounded up), or `None` if available.
    pub fn retry_after(&self, kind: JobKind) -> Option<u64> {
        let mut blocked = self.blocked_until.lock().unwrap_or_else(PoisonError::into_inner);
        let until = *blocked.get(&kind)?;
        let now = Instant::now();
        if until <= now {
            blocked.remove(&kind);
            return None;
        }
        let remaining = until - now;
        Some(remaining.as_secs_f64().ceil().max(1.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(default: u64, max: u64, jitter: f64) -> AvailabilityConfig {
        AvailabilityConfig {
            default_cooldown_seconds: default,
            max_cooldown_seconds: max,
            jitter_factor: jitter,
        }
    }

    #[test]
    fn cooldown_prefers_upstream_hint_and_caps_at_max() {
        let tracker = AvailabilityTracker::new(policy(60, 300, 0.0));
        assert_eq!(tracker.cooldown_for(None), Duration::from_secs(60));
        assert_eq!(tracker.cooldown_for(Some(120)), Duration::from_secs(120));
        assert_eq!(tracker.cooldown_for(Some(3600)), Duration::from_secs(300));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let tracker = AvailabilityTracker::new(policy(100, 1000, 0.1));
        for _ in 0..50 {
            let secs = tracker.cooldown_for(None).as_secs_f64();
            assert!((90.0..=110.0).contains(&secs), "cooldown {secs} out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires() {
        let tracker = AvailabilityTracker::new(policy(30, 300, 0.0));
        assert_eq!(tracker.retry_after(JobKind::Resourcing), None);

        tracker.mark_unavailable(JobKind::Resourcing, None);
        assert_eq!(tracker.retry_after(JobKind::Resourcing), Some(30));
        assert_eq!(tracker.retry_after(JobKind::IssueTracker), None);

        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(tracker.retry_after(JobKind::Resourcing), Some(18));

        tokio::time::advance(Duration::from_secs(18)).await;
        assert_eq!(tracker.retry_after(JobKind::Resourcing), None);
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_cooldown() {
        let tracker = AvailabilityTracker::new(policy(30, 300, 0.0));
        tracker.mark_unavailable(JobKind::IssueTracker, Some(90));
        assert_eq!(tracker.retry_after(JobKind::IssueTracker), Some(90));
        tracker.mark_available(JobKind::IssueTracker);
        assert_eq!(tracker.retry_after(JobKind::IssueTracker), None);
    }
}
