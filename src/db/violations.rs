//! Violation persistence (spec §3 `Violation`) — emitted by the Rate-Limit
//! Engine on denial, consumed by the Alert Evaluator.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use uuid::Uuid;

use super::pool::{DbError, DbPool};

#[derive(Debug, Clone)]
pub struct Violation {
    pub credential_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub client_ip: Option<IpAddr>,
    pub observed_count: i64,
    pub limit_value: i64,
    pub window_seconds: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DbViolation {
    pub id: Uuid,
    pub violation: Violation,
    pub processed_at: Option<DateTime<Utc>>,
}

pub struct ViolationRepository {
    pool: DbPool,
}

impl ViolationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, violation: &Violation) -> Result<Uuid, DbError> {
        let client = self.pool.get().await?;
        let ip = violation.client_ip.map(|ip| ip.to_string());
        let row = client
            .query_one(
                r#"
                INSERT INTO violations (
                    credential_id, endpoint, method, client_ip,
                    observed_count, limit_value, window_seconds, timestamp
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
                &[
                    &violation.credential_id,
                    &violation.endpoint,
                    &violation.method,
                    &ip,
                    &violation.observed_count,
                    &violation.limit_value,
                    &violation.window_seconds,
                    &violation.timestamp,
                ],
            )
            .await?;
        Ok(row.get("id"))
    }

    /// Unprocessed violations since `since`, for the Alert Evaluator's
    /// per-rule window scan (spec §4.5).
    pub async fn unprocessed_since(&self, credential_id: Uuid, since: DateTime<Utc>) -> Result<Vec<DbViolation>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, credential_id, endpoint, method, client_ip,
                       observed_count, limit_value, window_seconds, timestamp, processed_at
                FROM violations
                WHERE credential_id = $1 AND timestamp >= $2
                ORDER BY timestamp ASC
                "#,
                &[&credential_id, &since],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let ip: Option<String> = row.get("client_ip");
                DbViolation {
                    id: row.get("id"),
                    violation: Violation {
                        credential_id: row.get("credential_id"),
                        endpoint: row.get("endpoint"),
                        method: row.get("method"),
                        client_ip: ip.and_then(|s| s.parse().ok()),
                        observed_count: row.get("observed_count"),
                        limit_value: row.get("limit_value"),
                        window_seconds: row.get("window_seconds"),
                        timestamp: row.get("timestamp"),
                    },
                    processed_at: row.get("processed_at"),
                }
            })
            .collect())
    }

    pub async fn mark_processed(&self, ids: &[Uuid]) -> Result<u64, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let client = self.pool.get().await?;
        let updated = client
            .execute("UPDATE violations SET processed_at = NOW() WHERE id = ANY($1)", &[&ids])
            .await?;
        Ok(updated)
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>, batch_size: i64) -> Result<u64, DbError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                r#"
                DELETE FROM violations
                WHERE ctid IN (SELECT ctid FROM violations WHERE timestamp < $1 LIMIT $2)
                "#,
                &[&cutoff, &batch_size],
            )
            .await?;
        Ok(deleted)
    }
}
