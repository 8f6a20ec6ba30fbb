//! Rate-Limit Engine (C4)
//!
//! Implements the sliding-window-log algorithm of spec §4.1 against a
//! `CounterStore`. The engine is deliberately ignorant of where
//! `(limit, window)` came from — callers resolve that via the Credential
//! Service and pass it in, keeping this module a pure decision function
//! over a counter capability (spec §9 "dynamic dispatch" design note).

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::config::FailPolicy;
use crate::counter::{counter_key, CounterStore};

/// Outcome of a single `Decide` call (spec §6 `Check`).
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub retry_after: Option<Duration>,
    /// Set when the decision was produced by the fail policy rather than
    /// a real counter read (spec §4.1 "C1 unavailable").
    pub backend_error: bool,
}

pub struct RateLimitEngine<S: CounterStore> {
    store: S,
    key_prefix: String,
    fail_policy: FailPolicy,
}

impl<S: CounterStore> RateLimitEngine<S> {
    pub fn new(store: S, key_prefix: impl Into<String>, fail_policy: FailPolicy) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            fail_policy,
        }
    }

    /// `Decide(credential_id, cost, now) -> Decision` per spec §4.1.
    pub async fn decide(
        &self,
        namespace: &str,
        credential_id: Uuid,
        limit: u32,
        window: Duration,
        cost: u64,
        now: DateTime<Utc>,
    ) -> Decision {
        let limit = limit as u64;
        let window_ms = window.as_millis() as i64;
        let now_ms = now.timestamp_millis();
        let key = counter_key(&self.key_prefix, namespace, &credential_id);

        let sample = match self
            .store
            .check_and_increment(&key, now_ms, window_ms, limit, cost)
            .await
        {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, %credential_id, "rate limit backend error");
                return self.fail_policy_decision(limit, window, now);
            }
        };

        self.sample_to_decision(sample, limit, window, now)
    }

    /// `Info(credential_ref)` — read window stats without mutating.
    pub async fn info(
        &self,
        namespace: &str,
        credential_id: Uuid,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Decision {
        let limit = limit as u64;
        let window_ms = window.as_millis() as i64;
        let now_ms = now.timestamp_millis();
        let key = counter_key(&self.key_prefix, namespace, &credential_id);

        match self.store.peek(&key, now_ms, window_ms).await {
            Ok(sample) => self.sample_to_decision(sample, limit, window, now),
            Err(e) => {
                warn!(error = %e, %credential_id, "rate limit info backend error");
                self.fail_policy_decision(limit, window, now)
            }
        }
    }

    /// `Reset(credential_ref)` — clears counters. Does not touch C2/C3.
    pub async fn reset(&self, namespace: &str, credential_id: Uuid) -> Result<(), crate::counter::CounterError> {
        let key = counter_key(&self.key_prefix, namespace, &credential_id);
        self.store.reset(&key).await
    }

    /// `SetLimit` takes effect on the next `decide` call — there is no
    /// stored per-credential limit here to update; the caller simply
    /// passes the new `(limit, window)` on the next invocation. In-flight
    /// windows are not rewritten, matching spec §4.1.
    pub fn set_limit_note() -> &'static str {
        "limit/window are supplied per-call; updates apply on the next decide()"
    }

    fn sample_to_decision(
        &self,
        sample: crate::counter::WindowSample,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Decision {
        let window_start = sample
            .oldest_entry_ms
            .map(|ms| DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(now))
            .unwrap_or(now);
        let window_end = window_start + chrono::Duration::from_std(window).unwrap_or_default();
        let remaining = limit.saturating_sub(sample.used);

        let retry_after = if sample.allowed {
            None
        } else {
            let delta = window_end - now;
            Some(Duration::from_secs(delta.num_seconds().max(1) as u64))
        };

        Decision {
            allowed: sample.allowed,
            limit,
            used: sample.used,
            remaining,
            window_start,
            window_end,
            retry_after,
            backend_error: false,
        }
    }

    fn fail_policy_decision(&self, limit: u64, window: Duration, now: DateTime<Utc>) -> Decision {
        let allowed = matches!(self.fail_policy, FailPolicy::Open);
        let window_end = now + chrono::Duration::from_std(window).unwrap_or_default();
        Decision {
            allowed,
            limit,
            used: if allowed { 0 } else { limit },
            remaining: if allowed { limit } else { 0 },
            window_start: now,
            window_end,
            retry_after: if allowed {
                None
            } else {
                Some(window)
            },
            backend_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;

    fn engine(policy: FailPolicy) -> RateLimitEngine<MemoryCounterStore> {
        RateLimitEngine::new(MemoryCounterStore::new(), "viva", policy)
    }

    #[tokio::test]
    async fn exact_accounting_under_limit() {
        let engine = engine(FailPolicy::Closed);
        let cred = Uuid::new_v4();
        let now = Utc::now();

        for _ in 0..100 {
            let d = engine
                .decide("default", cred, 100, Duration::from_secs(60), 1, now)
                .await;
            assert!(d.allowed);
        }

        let denied = engine
            .decide("default", cred, 100, Duration::from_secs(60), 1, now)
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after.unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn cost_greater_than_limit_denies_without_mutation() {
        let engine = engine(FailPolicy::Closed);
        let cred = Uuid::new_v4();
        let now = Utc::now();

        let d = engine
            .decide("default", cred, 10, Duration::from_secs(60), 50, now)
            .await;
        assert!(!d.allowed);
        assert_eq!(d.used, 0);

        // A subsequent cost=1 decision should still see a clean window.
        let ok = engine
            .decide("default", cred, 10, Duration::from_secs(60), 1, now)
            .await;
        assert!(ok.allowed);
        assert_eq!(ok.used, 1);
    }

    #[tokio::test]
    async fn reset_clears_window() {
        let engine = engine(FailPolicy::Closed);
        let cred = Uuid::new_v4();
        let now = Utc::now();

        engine
            .decide("default", cred, 1, Duration::from_secs(60), 1, now)
            .await;
        let denied = engine
            .decide("default", cred, 1, Duration::from_secs(60), 1, now)
            .await;
        assert!(!denied.allowed);

        engine.reset("default", cred).await.unwrap();
        let allowed = engine
            .decide("default", cred, 1, Duration::from_secs(60), 1, now)
            .await;
        assert!(allowed.allowed);
        assert_eq!(allowed.used, 1);
    }
}
