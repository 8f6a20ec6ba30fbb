//! Billing record persistence (spec §3 `BillingRecord`) — produced by the
//! Billing Rollup aggregator (C8), one row per non-overlapping period.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::pool::{DbError, DbPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Pending,
    Paid,
    Overdue,
    Failed,
    Refunded,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Pending => "pending",
            BillingStatus::Paid => "paid",
            BillingStatus::Overdue => "overdue",
            BillingStatus::Failed => "failed",
            BillingStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BillingRecord {
    pub credential_id: Uuid,
    pub period_start: DateTime<Utc>,
    /// Half-open: the period covers `[period_start, period_end)`.
    pub period_end: DateTime<Utc>,
    pub total_requests: i64,
    pub overage_requests: i64,
    pub base_amount: f64,
    pub overage_amount: f64,
    pub currency: String,
}

impl BillingRecord {
    pub fn total_amount(&self) -> f64 {
        self.base_amount + self.overage_amount
    }
}

pub struct BillingRepository {
    pool: DbPool,
}

impl BillingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Fails on a uniqueness conflict over `(credential_id, period_start)`
    /// so the non-overlapping-periods invariant is enforced by the schema,
    /// not just application logic.
    pub async fn insert(&self, record: &BillingRecord) -> Result<Uuid, DbError> {
        let client = self.pool.get().await?;
        let total_amount = record.total_amount();
        let row = client
            .query_one(
                r#"
                INSERT INTO billing_records (
                    credential_id, period_start, period_end, total_requests, overage_requests,
                    base_amount, overage_amount, total_amount, currency, status, calculated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', NOW())
                RETURNING id
                "#,
                &[
                    &record.credential_id,
                    &record.period_start,
                    &record.period_end,
                    &record.total_requests,
                    &record.overage_requests,
                    &record.base_amount,
                    &record.overage_amount,
                    &total_amount,
                    &record.currency,
                ],
            )
            .await?;
        Ok(row.get("id"))
    }

    /// The most recent period's `period_end` for a credential, used to
    /// find the next contiguous, non-overlapping period start.
    pub async fn last_period_end(&self, credential_id: Uuid) -> Result<Option<DateTime<Utc>>, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT period_end FROM billing_records WHERE credential_id = $1 ORDER BY period_end DESC LIMIT 1",
                &[&credential_id],
            )
            .await?;
        Ok(row.map(|r| r.get("period_end")))
    }

    pub async fn set_status(&self, id: Uuid, status: BillingStatus) -> Result<bool, DbError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute("UPDATE billing_records SET status = $2 WHERE id = $1", &[&id, &status.as_str()])
            .await?;
        Ok(updated > 0)
    }

    /// Most recent `limit` billing records for a credential, newest first.
    pub async fn list_for_credential(&self, credential_id: Uuid, limit: i64) -> Result<Vec<BillingRecord>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT credential_id, period_start, period_end, total_requests, overage_requests,
                       base_amount, overage_amount, currency
                FROM billing_records
                WHERE credential_id = $1
                ORDER BY period_start DESC
                LIMIT $2
                "#,
                &[&credential_id, &limit],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| BillingRecord {
                credential_id: row.get("credential_id"),
                period_start: row.get("period_start"),
                period_end: row.get("period_end"),
                total_requests: row.get("total_requests"),
                overage_requests: row.get("overage_requests"),
                base_amount: row.get("base_amount"),
                overage_amount: row.get("overage_amount"),
                currency: row.get("currency"),
            })
            .collect())
    }
}
