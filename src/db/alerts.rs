//! Alert persistence — produced by the Alert Evaluator (C8) and
//! forwarded to an `AlertSink` (`src/aggregators/alerts.rs`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as Json;
use utoipa::ToSchema;
use uuid::Uuid;

use super::pool::{DbError, DbPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub credential_id: Uuid,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub metadata: Json,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DbAlert {
    pub id: Uuid,
    pub credential_id: Uuid,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub metadata: Json,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct AlertRepository {
    pool: DbPool,
}

impl AlertRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, alert: &NewAlert) -> Result<Uuid, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO alerts (credential_id, alert_type, severity, message, metadata, resolved, created_at)
                VALUES ($1, $2, $3, $4, $5, false, NOW())
                RETURNING id
                "#,
                &[
                    &alert.credential_id,
                    &alert.alert_type,
                    &alert.severity.as_str(),
                    &alert.message,
                    &alert.metadata,
                ],
            )
            .await?;
        Ok(row.get("id"))
    }

    /// Whether a rule already fired for `(credential_id, alert_type)`
    /// inside `cooldown`, enforcing at-most-once-per-cooldown firing.
    pub async fn fired_within(
        &self,
        credential_id: Uuid,
        alert_type: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM alerts WHERE credential_id = $1 AND alert_type = $2 AND created_at >= $3) AS fired",
                &[&credential_id, &alert_type, &since],
            )
            .await?;
        Ok(row.get("fired"))
    }

    pub async fn resolve(&self, id: Uuid, resolved_by: &str) -> Result<bool, DbError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE alerts SET resolved = true, resolved_at = NOW(), resolved_by = $2 WHERE id = $1 AND resolved = false",
                &[&id, &resolved_by],
            )
            .await?;
        Ok(updated > 0)
    }

    pub async fn list_unresolved(&self, credential_id: Uuid) -> Result<Vec<DbAlert>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, credential_id, alert_type, severity, message, metadata,
                       resolved, resolved_at, resolved_by, created_at
                FROM alerts
                WHERE credential_id = $1 AND resolved = false
                ORDER BY created_at DESC
                "#,
                &[&credential_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| DbAlert {
                id: row.get("id"),
                credential_id: row.get("credential_id"),
                alert_type: row.get("alert_type"),
                severity: row.get("severity"),
                message: row.get("message"),
                metadata: row.get("metadata"),
                resolved: row.get("resolved"),
                resolved_at: row.get("resolved_at"),
                resolved_by: row.get("resolved_by"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
