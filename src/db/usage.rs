//! Usage Log Store (C3) — append-heavy durable log of per-request records.
//!
//! Writes happen in batches from the Usage Recorder (`src/recorder/`)
//! rather than one row per request, generalizing the teacher's per-call
//! `log_usage`/`increment_monthly_usage` into a multi-row append (spec
//! §4.3 "a background flusher drains the buffer ... in a single
//! multi-row append").

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::pool::{DbError, DbPool};

/// A single request's usage record (spec §3 `UsageRecord`). Immutable
/// once written.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub credential_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub status_code: i32,
    pub response_time_ms: i32,
    pub request_size: i64,
    pub response_size: i64,
    pub client_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MonthlyUsageSummary {
    pub year_month: String,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStats {
    pub credential_id: Uuid,
    pub current_month: MonthlyUsageSummary,
    pub quota_limit: Option<i64>,
    pub quota_used: i64,
    pub quota_remaining: Option<i64>,
    pub quota_percentage_used: Option<f64>,
}

pub struct UsageRepository {
    pool: DbPool,
}

impl UsageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Multi-row append (spec §4.3). Returns the number of rows written;
    /// an empty batch is a no-op, not an error.
    pub async fn insert_batch(&self, records: &[UsageRecord]) -> Result<u64, DbError> {
        if records.is_empty() {
            return Ok(0);
        }

        let client = self.pool.get().await?;
        let mut sql = String::from(
            "INSERT INTO usage_records (credential_id, endpoint, method, status_code, \
             response_time_ms, request_size, response_size, client_ip, user_agent, country, timestamp) VALUES ",
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::with_capacity(records.len() * 11);
        let ips: Vec<Option<String>> = records.iter().map(|r| r.client_ip.map(|ip| ip.to_string())).collect();

        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                sql.push(',');
            }
            let base = i * 11;
            sql.push_str(&format!(
                "(${},${},${},${},${},${},${},${},${},${},${})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5,
                base + 6,
                base + 7,
                base + 8,
                base + 9,
                base + 10,
                base + 11,
            ));
            params.push(&record.credential_id);
            params.push(&record.endpoint);
            params.push(&record.method);
            params.push(&record.status_code);
            params.push(&record.response_time_ms);
            params.push(&record.request_size);
            params.push(&record.response_size);
            params.push(&ips[i]);
            params.push(&record.user_agent);
            params.push(&record.country);
            params.push(&record.timestamp);
        }

        let written = client.execute(sql.as_str(), &params[..]).await?;
        info!(rows = written, "flushed usage record batch");
        Ok(written)
    }

    pub async fn get_usage_stats(
        &self,
        credential_id: Uuid,
        quota_limit: Option<i64>,
        quota_used: i64,
    ) -> Result<UsageStats, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status_code < 400) AS successful,
                    COUNT(*) FILTER (WHERE status_code >= 400) AS failed,
                    COALESCE(AVG(response_time_ms), 0) AS avg_rt
                FROM usage_records
                WHERE credential_id = $1
                  AND timestamp >= date_trunc('month', NOW())
                "#,
                &[&credential_id],
            )
            .await?;

        let total: i64 = row.get("total");
        let successful: i64 = row.get("successful");
        let failed: i64 = row.get("failed");
        let avg_rt: f64 = row.get("avg_rt");

        let quota_remaining = quota_limit.map(|q| (q - quota_used).max(0));
        let quota_percentage_used = quota_limit
            .filter(|&q| q > 0)
            .map(|q| (quota_used as f64 / q as f64) * 100.0);

        Ok(UsageStats {
            credential_id,
            current_month: MonthlyUsageSummary {
                year_month: Utc::now().format("%Y-%m").to_string(),
                total_requests: total,
                successful_requests: successful,
                failed_requests: failed,
                avg_response_time_ms: avg_rt,
            },
            quota_limit,
            quota_used,
            quota_remaining,
            quota_percentage_used,
        })
    }

    pub async fn get_monthly_history(&self, credential_id: Uuid, months: i32) -> Result<Vec<MonthlyUsageSummary>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT
                    to_char(date_trunc('month', timestamp), 'YYYY-MM') AS ym,
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status_code < 400) AS successful,
                    COUNT(*) FILTER (WHERE status_code >= 400) AS failed,
                    COALESCE(AVG(response_time_ms), 0) AS avg_rt
                FROM usage_records
                WHERE credential_id = $1
                  AND timestamp >= date_trunc('month', NOW()) - ($2 || ' months')::interval
                GROUP BY 1
                ORDER BY 1 DESC
                "#,
                &[&credential_id, &months.to_string()],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| MonthlyUsageSummary {
                year_month: row.get("ym"),
                total_requests: row.get("total"),
                successful_requests: row.get("successful"),
                failed_requests: row.get("failed"),
                avg_response_time_ms: row.get("avg_rt"),
            })
            .collect())
    }

    /// Retention sweep (spec §3 `UsageRecord` lifecycle: "pruned by
    /// retention sweep after `retention_days`"). Deletes in bounded
    /// batches so a large backlog never holds one transaction open for
    /// the whole sweep.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>, batch_size: i64) -> Result<u64, DbError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                r#"
                DELETE FROM usage_records
                WHERE ctid IN (
                    SELECT ctid FROM usage_records WHERE timestamp < $1 LIMIT $2
                )
                "#,
                &[&cutoff, &batch_size],
            )
            .await?;
        Ok(deleted)
    }

    /// Distinct credentials with at least one request since `since`, used
    /// by the usage rollup aggregator to know which summaries to refresh
    /// without scanning the whole credential table every tick.
    pub async fn active_credential_ids_since(&self, since: DateTime<Utc>) -> Result<Vec<Uuid>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT DISTINCT credential_id FROM usage_records WHERE timestamp >= $1",
                &[&since],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get("credential_id")).collect())
    }

    /// Request count and error rate for one credential inside
    /// `[since, until)`, used alongside `response_time_percentiles` to
    /// build one rollup row (spec §4.5 "usage rollup").
    pub async fn count_and_error_rate(
        &self,
        credential_id: Uuid,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<(i64, f64), DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT
                    COUNT(*) AS total,
                    COALESCE(COUNT(*) FILTER (WHERE status_code >= 400)::float8 / NULLIF(COUNT(*), 0), 0) AS error_rate
                FROM usage_records
                WHERE credential_id = $1 AND timestamp >= $2 AND timestamp < $3
                "#,
                &[&credential_id, &since, &until],
            )
            .await?;
        Ok((row.get("total"), row.get("error_rate")))
    }

    /// Percentile response-time figures for the usage rollup aggregator.
    pub async fn response_time_percentiles(
        &self,
        credential_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<(f64, f64, f64), DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT
                    COALESCE(percentile_cont(0.5) WITHIN GROUP (ORDER BY response_time_ms), 0) AS p50,
                    COALESCE(percentile_cont(0.95) WITHIN GROUP (ORDER BY response_time_ms), 0) AS p95,
                    COALESCE(percentile_cont(0.99) WITHIN GROUP (ORDER BY response_time_ms), 0) AS p99
                FROM usage_records
                WHERE credential_id = $1 AND timestamp >= $2
                "#,
                &[&credential_id, &since],
            )
            .await?;
        Ok((row.get("p50"), row.get("p95"), row.get("p99")))
    }

    /// Most recent `limit` status codes for a credential, newest first —
    /// used by the Alert Evaluator's `consecutive_failures` rule (spec
    /// §4.5), which has no other durable signal for backend-unavailable
    /// streaks since those denials emit no `Violation` row.
    pub async fn recent_status_codes(&self, credential_id: Uuid, limit: i64) -> Result<Vec<i32>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT status_code FROM usage_records WHERE credential_id = $1 ORDER BY timestamp DESC LIMIT $2",
                &[&credential_id, &limit],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get("status_code")).collect())
    }

    /// Upserts one precomputed rollup row (spec §4.5 "writes precomputed
    /// summaries (hour/day) for cheap reads"), keyed by
    /// `(credential_id, granularity, period_start)` so a re-run of the
    /// same period's task overwrites rather than duplicates.
    pub async fn upsert_summary(&self, summary: &UsageSummary) -> Result<(), DbError> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO usage_summaries (
                    credential_id, granularity, period_start, total_requests,
                    error_rate, p50_response_time_ms, p95_response_time_ms, p99_response_time_ms, computed_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
                ON CONFLICT (credential_id, granularity, period_start) DO UPDATE SET
                    total_requests = EXCLUDED.total_requests,
                    error_rate = EXCLUDED.error_rate,
                    p50_response_time_ms = EXCLUDED.p50_response_time_ms,
                    p95_response_time_ms = EXCLUDED.p95_response_time_ms,
                    p99_response_time_ms = EXCLUDED.p99_response_time_ms,
                    computed_at = NOW()
                "#,
                &[
                    &summary.credential_id,
                    &summary.granularity,
                    &summary.period_start,
                    &summary.total_requests,
                    &summary.error_rate,
                    &summary.p50_response_time_ms,
                    &summary.p95_response_time_ms,
                    &summary.p99_response_time_ms,
                ],
            )
            .await?;
        Ok(())
    }
}

/// A precomputed hour/day rollup row (spec §4.5 `Usage Rollup`).
#[derive(Debug, Clone)]
pub struct UsageSummary {
    pub credential_id: Uuid,
    /// `"hour"` or `"day"`.
    pub granularity: String,
    pub period_start: DateTime<Utc>,
    pub total_requests: i64,
    pub error_rate: f64,
    pub p50_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
}
