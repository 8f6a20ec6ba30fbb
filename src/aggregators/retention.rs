//! Retention sweep (spec §4.5) — deletes usage records and violations
//! older than `retention_days` in bounded batches so a single run never
//! holds a long-lived transaction or blocks the pool for other work.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value as Json;
use tracing::{info, instrument};

use crate::db::usage::UsageRepository;
use crate::db::violations::ViolationRepository;

const BATCH_SIZE: i64 = 5_000;

pub struct RetentionSweep {
    usage_repo: Arc<UsageRepository>,
    violation_repo: Arc<ViolationRepository>,
    retention_days: u32,
}

impl RetentionSweep {
    pub fn new(usage_repo: Arc<UsageRepository>, violation_repo: Arc<ViolationRepository>, retention_days: u32) -> Self {
        Self {
            usage_repo,
            violation_repo,
            retention_days,
        }
    }

    #[instrument(skip(self, _payload))]
    pub async fn run(&self, _payload: Json) -> Result<(), String> {
        let cutoff = Utc::now() - ChronoDuration::days(self.retention_days as i64);

        let usage_deleted = self.sweep(|| self.usage_repo.delete_older_than(cutoff, BATCH_SIZE)).await?;
        let violations_deleted = self.sweep(|| self.violation_repo.delete_older_than(cutoff, BATCH_SIZE)).await?;

        info!(usage_deleted, violations_deleted, %cutoff, "retention sweep complete");
        Ok(())
    }

    async fn sweep<F, Fut>(&self, mut delete_batch: F) -> Result<u64, String>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<u64, crate::db::pool::DbError>>,
    {
        let mut total = 0u64;
        loop {
            let deleted = delete_batch().await.map_err(|e| e.to_string())?;
            total += deleted;
            if deleted < BATCH_SIZE as u64 {
                break;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_positive() {
        assert!(BATCH_SIZE > 0);
    }
}
