//! In-process `CounterStore` for single-replica / development deployments.
//!
//! Sharded by `dashmap` so that unrelated credentials never contend on
//! the same lock. Each shard cell stores the sorted timestamps of
//! requests still inside the window; purge-then-count happens under
//! the same lock acquisition as the insert, giving the same atomicity
//! a single Lua script would.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{CounterError, CounterStore, WindowSample};

#[derive(Default)]
struct Cell {
    /// Ascending timestamps (ms) of requests still tracked for this key.
    entries: Vec<i64>,
}

impl Cell {
    fn purge(&mut self, cutoff_ms: i64) {
        // Entries are inserted in non-decreasing order, so a single
        // retain pass (or a binary-search partition point) suffices.
        let first_live = self.entries.partition_point(|&ts| ts <= cutoff_ms);
        if first_live > 0 {
            self.entries.drain(0..first_live);
        }
    }
}

/// In-memory sliding-window-log counter store.
pub struct MemoryCounterStore {
    cells: Arc<DashMap<String, Mutex<Cell>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            cells: Arc::new(DashMap::new()),
        }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check_and_increment(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
        cost: u64,
    ) -> Result<WindowSample, CounterError> {
        let cutoff = now_ms.saturating_sub(window_ms);
        let entry = self.cells.entry(key.to_string()).or_default();
        let mut cell = entry.lock();

        cell.purge(cutoff);
        let used = cell.entries.len() as u64;

        if used + cost > limit {
            let oldest = cell.entries.first().copied();
            return Ok(WindowSample {
                allowed: false,
                used,
                oldest_entry_ms: oldest,
            });
        }

        for _ in 0..cost {
            cell.entries.push(now_ms);
        }

        Ok(WindowSample {
            allowed: true,
            used: used + cost,
            oldest_entry_ms: cell.entries.first().copied(),
        })
    }

    async fn peek(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<WindowSample, CounterError> {
        let cutoff = now_ms.saturating_sub(window_ms);
        match self.cells.get(key) {
            Some(entry) => {
                let mut cell = entry.lock();
                cell.purge(cutoff);
                Ok(WindowSample {
                    allowed: true,
                    used: cell.entries.len() as u64,
                    oldest_entry_ms: cell.entries.first().copied(),
                })
            }
            None => Ok(WindowSample {
                allowed: true,
                used: 0,
                oldest_entry_ms: None,
            }),
        }
    }

    async fn reset(&self, key: &str) -> Result<(), CounterError> {
        self.cells.remove(key);
        Ok(())
    }

    async fn close(&self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_denies() {
        let store = MemoryCounterStore::new();
        let key = "viva:default:00000000-0000-0000-0000-000000000000";

        for i in 0..5 {
            let sample = store
                .check_and_increment(key, 1_000 + i, 60_000, 5, 1)
                .await
                .unwrap();
            assert!(sample.allowed, "request {i} should be allowed");
        }

        let denied = store.check_and_increment(key, 1_005, 60_000, 5, 1).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.used, 5);
    }

    #[tokio::test]
    async fn window_slides_forward() {
        let store = MemoryCounterStore::new();
        let key = "viva:default:slide";

        for i in 0..3 {
            store.check_and_increment(key, i, 1_000, 3, 1).await.unwrap();
        }
        let denied = store.check_and_increment(key, 500, 1_000, 3, 1).await.unwrap();
        assert!(!denied.allowed);

        // Past the window: all three original entries have expired.
        let allowed = store.check_and_increment(key, 2_000, 1_000, 3, 1).await.unwrap();
        assert!(allowed.allowed);
        assert_eq!(allowed.used, 1);
    }

    #[tokio::test]
    async fn cost_greater_than_limit_always_denied() {
        let store = MemoryCounterStore::new();
        let key = "viva:default:cost";
        let sample = store.check_and_increment(key, 0, 60_000, 3, 10).await.unwrap();
        assert!(!sample.allowed);
        assert_eq!(sample.used, 0);
    }

    #[tokio::test]
    async fn reset_clears_counter() {
        let store = MemoryCounterStore::new();
        let key = "viva:default:reset";
        store.check_and_increment(key, 0, 60_000, 1, 1).await.unwrap();
        store.reset(key).await.unwrap();
        let sample = store.check_and_increment(key, 1, 60_000, 1, 1).await.unwrap();
        assert!(sample.allowed);
        assert_eq!(sample.used, 1);
    }
}
