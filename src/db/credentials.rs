//! Credential persistence (C2 Credential Store).
//!
//! Same hash-and-prefix lookup shape as a plain API-key table, extended
//! with the full credential lifecycle: tier, status, quota, owner,
//! tags, metadata.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use super::pool::{DbError, DbPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Free,
    Basic,
    Standard,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Standard => "standard",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "basic" => Tier::Basic,
            "standard" => Tier::Standard,
            "pro" => Tier::Pro,
            "enterprise" => Tier::Enterprise,
            _ => Tier::Free,
        }
    }
}

/// `active | suspended | revoked | expired`. Enforced by
/// `Status::can_transition_to` per the FSM: `active -> {suspended,
/// revoked, expired}`; `suspended -> {active, revoked}`; `revoked` and
/// `expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Suspended,
    Revoked,
    Expired,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Suspended => "suspended",
            Status::Revoked => "revoked",
            Status::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "suspended" => Status::Suspended,
            "revoked" => Status::Revoked,
            "expired" => Status::Expired,
            _ => Status::Active,
        }
    }

    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Active, Status::Suspended)
                | (Status::Active, Status::Revoked)
                | (Status::Active, Status::Expired)
                | (Status::Suspended, Status::Active)
                | (Status::Suspended, Status::Revoked)
        )
    }
}

/// Durable credential row.
#[derive(Debug, Clone)]
pub struct DbCredential {
    pub id: Uuid,
    pub key_prefix: String,
    pub key_hash: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_email: String,
    pub owner_name: Option<String>,
    pub tier: String,
    pub status: String,
    pub rate_limit: i32,
    pub rate_window_secs: i32,
    pub quota_limit: Option<i64>,
    pub total_usage: i64,
    pub tags: Vec<String>,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DbCredential {
    pub fn tier_enum(&self) -> Tier {
        Tier::from_str(&self.tier)
    }

    pub fn status_enum(&self) -> Status {
        Status::from_str(&self.status)
    }

    /// A credential is usable when active, not soft-deleted, and not past
    /// `expires_at`.
    pub fn is_usable(&self) -> bool {
        if self.deleted_at.is_some() {
            return false;
        }
        if self.status_enum() != Status::Active {
            return false;
        }
        if let Some(expires) = self.expires_at {
            if expires < Utc::now() {
                return false;
            }
        }
        true
    }
}

#[derive(Debug)]
pub struct CreateCredentialRequest {
    pub name: String,
    pub description: Option<String>,
    pub owner_email: String,
    pub owner_name: Option<String>,
    pub tier: Tier,
    pub rate_limit: Option<i32>,
    pub rate_window_secs: Option<i32>,
    pub quota_limit: Option<i64>,
    pub tags: Vec<String>,
    pub metadata: Json,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The bare secret is returned exactly once, at creation.
#[derive(Debug)]
pub struct CreateCredentialResponse {
    pub id: Uuid,
    pub secret: String,
    pub key_prefix: String,
    pub name: String,
    pub tier: String,
    pub rate_limit: i32,
    pub rate_window_secs: i32,
}

/// Repository over the `credentials` table.
pub struct CredentialRepository {
    pub pool: DbPool,
    /// e.g. `viva` — secrets are emitted as `<prefix>_<hex(32 bytes)>`.
    pub secret_prefix: String,
}

const SECRET_BYTES: usize = 32;
const PREFIX_LOOKUP_LEN: usize = 12;

impl CredentialRepository {
    pub fn new(pool: DbPool, secret_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            secret_prefix: secret_prefix.into(),
        }
    }

    /// `<prefix>_<hex(32 random bytes)>`, total length well under the
    /// spec's 96-character ceiling.
    fn generate_secret(&self) -> String {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("{}_{}", self.secret_prefix, hex::encode(bytes))
    }

    fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn lookup_prefix(secret: &str) -> Option<&str> {
        secret.get(..PREFIX_LOOKUP_LEN)
    }

    pub async fn create(&self, request: CreateCredentialRequest) -> Result<CreateCredentialResponse, DbError> {
        let client = self.pool.get().await?;

        let secret = self.generate_secret();
        let key_prefix = Self::lookup_prefix(&secret)
            .unwrap_or(&secret)
            .to_string();
        let key_hash = Self::hash_secret(&secret);

        let rate_limit = request.rate_limit.unwrap_or_else(|| default_rate_limit(request.tier));
        let rate_window_secs = request.rate_window_secs.unwrap_or(3600);

        let row = client
            .query_one(
                r#"
                INSERT INTO credentials (
                    key_prefix, key_hash, name, description, owner_email, owner_name,
                    tier, status, rate_limit, rate_window_secs, quota_limit, total_usage,
                    tags, metadata, expires_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8, $9, $10, 0, $11, $12, $13)
                RETURNING id
                "#,
                &[
                    &key_prefix,
                    &key_hash,
                    &request.name,
                    &request.description,
                    &request.owner_email,
                    &request.owner_name,
                    &request.tier.as_str(),
                    &rate_limit,
                    &rate_window_secs,
                    &request.quota_limit,
                    &request.tags,
                    &request.metadata,
                    &request.expires_at,
                ],
            )
            .await?;

        let id: Uuid = row.get("id");

        info!(credential_id = %id, %key_prefix, tier = %request.tier.as_str(), "created credential");

        Ok(CreateCredentialResponse {
            id,
            secret,
            key_prefix,
            name: request.name,
            tier: request.tier.as_str().to_string(),
            rate_limit,
            rate_window_secs,
        })
    }

    /// Hash-and-prefix lookup. Always hashes the presented secret even
    /// when the prefix is unknown, so that the query shape — and
    /// therefore the latency distribution — does not depend on whether
    /// the prefix matches anything.
    pub async fn validate(&self, secret: &str) -> Result<Option<DbCredential>, DbError> {
        let client = self.pool.get().await?;

        let key_hash = Self::hash_secret(secret);
        let key_prefix = Self::lookup_prefix(secret).unwrap_or("").to_string();

        let row = client
            .query_opt(&Self::select_sql("WHERE key_prefix = $1 AND key_hash = $2"), &[&key_prefix, &key_hash])
            .await?;

        Ok(row.map(Self::from_row))
    }

    pub async fn touch(&self, id: Uuid) -> Result<(), DbError> {
        let client = self.pool.get().await?;
        client
            .execute("UPDATE credentials SET last_used_at = NOW() WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    /// Monotonic bump of `total_usage`.
    pub async fn increment_usage(&self, id: Uuid, by: i64) -> Result<(), DbError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE credentials SET total_usage = total_usage + $2 WHERE id = $1",
                &[&id, &by],
            )
            .await?;
        Ok(())
    }

    /// Reset `total_usage` to zero at the start of a new billing period.
    pub async fn reset_usage(&self, id: Uuid) -> Result<(), DbError> {
        let client = self.pool.get().await?;
        client
            .execute("UPDATE credentials SET total_usage = 0 WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<DbCredential>, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(&Self::select_sql("WHERE id = $1 AND deleted_at IS NULL"), &[&id])
            .await?;
        Ok(row.map(Self::from_row))
    }

    pub async fn list_by_owner(&self, owner_email: &str) -> Result<Vec<DbCredential>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &Self::select_sql("WHERE owner_email = $1 AND deleted_at IS NULL ORDER BY created_at DESC"),
                &[&owner_email],
            )
            .await?;
        Ok(rows.iter().map(Self::from_row).collect())
    }

    /// Status transition helper enforcing `Status::can_transition_to`.
    pub async fn set_status(&self, id: Uuid, next: Status) -> Result<bool, DbError> {
        let Some(current) = self.get_by_id(id).await? else {
            return Ok(false);
        };
        if !current.status_enum().can_transition_to(next) {
            warn!(credential_id = %id, from = %current.status, to = next.as_str(), "rejected illegal status transition");
            return Ok(false);
        }

        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE credentials SET status = $2, updated_at = NOW() WHERE id = $1",
                &[&id, &next.as_str()],
            )
            .await?;
        Ok(updated > 0)
    }

    /// Atomically replaces the secret hash (rotation).
    pub async fn rotate(&self, id: Uuid) -> Result<Option<String>, DbError> {
        let secret = self.generate_secret();
        let key_prefix = Self::lookup_prefix(&secret).unwrap_or(&secret).to_string();
        let key_hash = Self::hash_secret(&secret);

        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE credentials SET key_prefix = $2, key_hash = $3, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
                &[&id, &key_prefix, &key_hash],
            )
            .await?;

        if updated == 0 {
            return Ok(None);
        }
        info!(credential_id = %id, "rotated credential secret");
        Ok(Some(secret))
    }

    /// Soft-delete.
    pub async fn soft_delete(&self, id: Uuid) -> Result<bool, DbError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE credentials SET deleted_at = NOW(), status = 'revoked' WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(updated > 0)
    }

    /// All active, non-deleted credentials — the Alert Evaluator's scan
    /// set for its per-credential rule pass.
    pub async fn list_active(&self) -> Result<Vec<DbCredential>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(&Self::select_sql("WHERE status = 'active' AND deleted_at IS NULL"), &[])
            .await?;
        Ok(rows.iter().map(Self::from_row).collect())
    }

    /// Credentials whose `expires_at` has passed but are still `active`
    /// (used by the periodic scheduler's expiry sweep).
    pub async fn list_expired_active(&self) -> Result<Vec<DbCredential>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &Self::select_sql("WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < NOW()"),
                &[],
            )
            .await?;
        Ok(rows.iter().map(Self::from_row).collect())
    }

    fn select_sql(clause: &str) -> String {
        format!(
            r#"
            SELECT
                id, key_prefix, key_hash, name, description, owner_email, owner_name,
                tier, status, rate_limit, rate_window_secs, quota_limit, total_usage,
                tags, metadata, created_at, updated_at, last_used_at, expires_at, deleted_at
            FROM credentials
            {clause}
            "#
        )
    }

    fn from_row(row: &tokio_postgres::Row) -> DbCredential {
        DbCredential {
            id: row.get("id"),
            key_prefix: row.get("key_prefix"),
            key_hash: row.get("key_hash"),
            name: row.get("name"),
            description: row.get("description"),
            owner_email: row.get("owner_email"),
            owner_name: row.get("owner_name"),
            tier: row.get("tier"),
            status: row.get("status"),
            rate_limit: row.get("rate_limit"),
            rate_window_secs: row.get("rate_window_secs"),
            quota_limit: row.get("quota_limit"),
            total_usage: row.get("total_usage"),
            tags: row.get("tags"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            last_used_at: row.get("last_used_at"),
            expires_at: row.get("expires_at"),
            deleted_at: row.get("deleted_at"),
        }
    }
}

fn default_rate_limit(tier: Tier) -> i32 {
    match tier {
        Tier::Free => 60,
        Tier::Basic => 300,
        Tier::Standard => 1_200,
        Tier::Pro => 6_000,
        Tier::Enterprise => 30_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_returns_to_active_from_revoked() {
        assert!(!Status::Revoked.can_transition_to(Status::Active));
        assert!(Status::Active.can_transition_to(Status::Suspended));
        assert!(Status::Suspended.can_transition_to(Status::Active));
    }

    #[test]
    fn status_fsm_matches_spec_allow_list() {
        assert!(Status::Active.can_transition_to(Status::Suspended));
        assert!(Status::Active.can_transition_to(Status::Revoked));
        assert!(Status::Active.can_transition_to(Status::Expired));
        assert!(Status::Suspended.can_transition_to(Status::Active));
        assert!(Status::Suspended.can_transition_to(Status::Revoked));

        assert!(!Status::Suspended.can_transition_to(Status::Expired));
        assert!(!Status::Expired.can_transition_to(Status::Active));
        assert!(!Status::Expired.can_transition_to(Status::Suspended));
        assert!(!Status::Revoked.can_transition_to(Status::Suspended));
        assert!(!Status::Revoked.can_transition_to(Status::Expired));
        assert!(!Status::Revoked.can_transition_to(Status::Revoked));
        assert!(!Status::Expired.can_transition_to(Status::Expired));
    }

    #[test]
    fn secret_prefix_lookup_is_stable_length() {
        let secret = "viva_deadbeefdeadbeefdeadbeefdeadbeef";
        assert_eq!(CredentialRepository::lookup_prefix(secret).unwrap().len(), PREFIX_LOOKUP_LEN);
    }
}
