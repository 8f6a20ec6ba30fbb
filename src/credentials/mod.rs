//! Credential Service (C5) — generation, hashing, validation, rotation,
//! expiry, and tier resolution on top of the `CredentialRepository`.
//! Sits a validation cache and an explicit status state machine in
//! front of direct repository calls.

pub mod cache;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::credentials::{
    CreateCredentialRequest, CreateCredentialResponse, CredentialRepository, DbCredential, Status, Tier,
};
use crate::db::pool::DbError;
use crate::error::ServiceError;

pub use cache::CredentialCache;

/// Tier-derived defaults handed to the Rate-Limit Engine and Billing
/// Rollup; resolved once per credential rather than hardcoded per tier
/// at every call site.
#[derive(Debug, Clone, Copy)]
pub struct TierProfile {
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub monthly_quota: u64,
    pub overage_rate_per_1000: f64,
    pub base_price: f64,
}

pub struct CredentialService {
    repo: CredentialRepository,
    cache: CredentialCache,
    tiers: crate::config::TierSettings,
}

impl CredentialService {
    pub fn new(repo: CredentialRepository, cache_ttl_ms: u64, tiers: crate::config::TierSettings) -> Self {
        Self {
            repo,
            cache: CredentialCache::new(cache_ttl_ms),
            tiers,
        }
    }

    #[instrument(skip(self, request))]
    pub async fn create(&self, request: CreateCredentialRequest) -> Result<CreateCredentialResponse, ServiceError> {
        if request.name.trim().is_empty() {
            return Err(ServiceError::invalid_input("name must not be empty"));
        }
        self.repo.create(request).await.map_err(ServiceError::from)
    }

    /// Always hashes the presented secret and always issues the same
    /// repository call shape, so that a nonexistent-prefix secret and a
    /// known-invalid one take the same code path: latency stays in the
    /// same class without a literal constant-time byte comparison (the
    /// DB index lookup dominates).
    #[instrument(skip(self, secret))]
    pub async fn validate(&self, secret: &str) -> Result<DbCredential, ServiceError> {
        if secret.len() < 8 {
            return Err(ServiceError::unauthorized("invalid credential"));
        }

        let key_hash = sha256_hex(secret);
        if let Some(cached) = self.cache.get(&key_hash) {
            return Self::check_usable(cached);
        }

        let credential = self
            .repo
            .validate(secret)
            .await?
            .ok_or_else(|| ServiceError::unauthorized("invalid credential"))?;

        self.cache.put(key_hash, credential.clone());
        Self::check_usable(credential)
    }

    fn check_usable(credential: DbCredential) -> Result<DbCredential, ServiceError> {
        if credential.deleted_at.is_some() {
            return Err(ServiceError::unauthorized("credential revoked"));
        }
        match credential.status_enum() {
            Status::Active => {}
            Status::Suspended => return Err(ServiceError::unauthorized("credential suspended")),
            Status::Revoked => return Err(ServiceError::unauthorized("credential revoked")),
            Status::Expired => return Err(ServiceError::unauthorized("credential expired")),
        }
        if let Some(expires) = credential.expires_at {
            if expires < Utc::now() {
                return Err(ServiceError::unauthorized("credential expired"));
            }
        }
        Ok(credential)
    }

    pub fn tier_profile(&self, tier: Tier) -> TierProfile {
        let default = match tier {
            Tier::Free => &self.tiers.free,
            Tier::Basic => &self.tiers.basic,
            Tier::Standard => &self.tiers.standard,
            Tier::Pro => &self.tiers.pro,
            Tier::Enterprise => &self.tiers.enterprise,
        };
        TierProfile {
            rate_limit: default.rate_limit,
            rate_window: Duration::from_secs(3600),
            monthly_quota: default.monthly_quota,
            overage_rate_per_1000: default.overage_rate_per_1000,
            base_price: default.base_price,
        }
    }

    /// `(limit, window)` resolution for the Rate-Limit Engine (spec
    /// §4.1 step 1): the credential's own override takes precedence over
    /// the tier default.
    pub fn effective_limit(&self, credential: &DbCredential) -> (u32, Duration) {
        let limit = credential.rate_limit.max(1) as u32;
        let window = Duration::from_secs(credential.rate_window_secs.max(1) as u64);
        (limit, window)
    }

    #[instrument(skip(self))]
    pub async fn rotate(&self, id: Uuid) -> Result<String, ServiceError> {
        self.cache.invalidate(id);
        self.repo
            .rotate(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("credential not found"))
    }

    #[instrument(skip(self))]
    pub async fn set_status(&self, id: Uuid, status: Status) -> Result<(), ServiceError> {
        self.cache.invalidate(id);
        let updated = self.repo.set_status(id, status).await?;
        if !updated {
            return Err(ServiceError::conflict("illegal status transition or credential not found"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn soft_delete(&self, id: Uuid) -> Result<(), ServiceError> {
        self.cache.invalidate(id);
        let deleted = self.repo.soft_delete(id).await?;
        if !deleted {
            return Err(ServiceError::not_found("credential not found"));
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<DbCredential, ServiceError> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("credential not found"))
    }

    pub async fn list(&self, owner_email: &str) -> Result<Vec<DbCredential>, ServiceError> {
        Ok(self.repo.list_by_owner(owner_email).await?)
    }

    /// Bulk transition of credentials whose `last_used_at` predates
    /// `cutoff` to `expired`.
    #[instrument(skip(self))]
    pub async fn expire_unused(&self, cutoff: DateTime<Utc>) -> Result<u64, ServiceError> {
        let expired = self.repo.list_expired_active().await?;
        let mut count = 0u64;
        for credential in expired {
            let stale = credential
                .last_used_at
                .map(|last| last < cutoff)
                .unwrap_or(true);
            if stale && self.repo.set_status(credential.id, Status::Expired).await? {
                self.cache.invalidate(credential.id);
                count += 1;
            }
        }
        info!(count, "expired unused credentials");
        Ok(count)
    }

    pub async fn increment_usage(&self, id: Uuid, by: i64) -> Result<(), DbError> {
        self.repo.increment_usage(id, by).await
    }

    pub async fn touch(&self, id: Uuid) -> Result<(), DbError> {
        self.repo.touch(id).await
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Credential cache reconciliation (spec §4.4): proactively evicts
    /// expired cache entries rather than waiting on the next `get` to
    /// land on them. Does not touch credential status.
    pub fn reconcile_cache(&self) -> usize {
        self.cache.reconcile()
    }
}

fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[allow(dead_code)]
pub type Metadata = Json;
