//! Shared Counter Store (C1)
//!
//! Atomic, TTL-bound sliding-window counters shared across replicas. The
//! `CounterStore` capability is narrow on purpose: components that need
//! counters depend only on this trait, and the concrete backend is
//! wired up at composition time in `main.rs`.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter backend unavailable: {0}")]
    Backend(String),
    #[error("counter operation timed out")]
    Timeout,
}

/// Outcome of a single atomic sliding-window check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSample {
    pub allowed: bool,
    /// Count of entries in the window *after* this call (includes the
    /// newly inserted entries when allowed).
    pub used: u64,
    /// Millisecond timestamp of the oldest surviving entry, if any.
    pub oldest_entry_ms: Option<i64>,
}

/// A capability for atomic sliding-window-log counters, keyed by an
/// opaque string (`<prefix>:<namespace>:<credential_id>`).
///
/// Implementations MUST purge expired entries, count survivors, and —
/// only if `used + cost <= limit` — insert `cost` new entries, all in a
/// single indivisible operation per key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically purge expired entries, count the remainder, and insert
    /// `cost` new entries at `now_ms` if doing so would not exceed
    /// `limit`. `window_ms` bounds how far back entries are counted.
    async fn check_and_increment(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
        cost: u64,
    ) -> Result<WindowSample, CounterError>;

    /// Count current entries without mutating the key (used by `Info`).
    async fn peek(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<WindowSample, CounterError>;

    /// Delete all entries for `key` (admin `Reset`).
    async fn reset(&self, key: &str) -> Result<(), CounterError>;

    /// Release any held resources (connections, background tasks).
    async fn close(&self);
}

/// Build the counter key: `<prefix>:<namespace>:<credential_id>`.
pub fn counter_key(prefix: &str, namespace: &str, credential_id: &uuid::Uuid) -> String {
    format!("{prefix}:{namespace}:{credential_id}")
}

/// Lets `RateLimitEngine<Arc<dyn CounterStore>>` pick its backend at
/// runtime while the engine itself stays generic over the
/// `CounterStore` capability rather than hardcoding `Box<dyn _>` at
/// every call site.
#[async_trait]
impl CounterStore for Arc<dyn CounterStore> {
    async fn check_and_increment(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
        cost: u64,
    ) -> Result<WindowSample, CounterError> {
        (**self).check_and_increment(key, now_ms, window_ms, limit, cost).await
    }

    async fn peek(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<WindowSample, CounterError> {
        (**self).peek(key, now_ms, window_ms).await
    }

    async fn reset(&self, key: &str) -> Result<(), CounterError> {
        (**self).reset(key).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}
