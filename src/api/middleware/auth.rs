//! Credential extraction and request-extension plumbing.
//!
//! Mirrors the teacher's `X-API-Key` / `Authorization: Bearer` extraction
//! shape; the validated credential itself now comes from the
//! `CredentialService` rather than a direct repository call.

use actix_web::{
    dev::ServiceRequest,
    http::header::AUTHORIZATION,
    HttpMessage,
};

use crate::db::credentials::DbCredential;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Extracts the presented secret from `X-API-Key` or `Authorization: Bearer`.
pub fn extract_secret(req: &ServiceRequest) -> Option<String> {
    if let Some(key) = req.headers().get(API_KEY_HEADER) {
        if let Ok(key_str) = key.to_str() {
            return Some(key_str.to_string());
        }
    }

    if let Some(auth) = req.headers().get(AUTHORIZATION) {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Authenticated credential, stashed in request extensions by the rate
/// limit middleware for downstream handlers.
#[derive(Clone)]
pub struct CredentialAuth {
    pub credential_id: uuid::Uuid,
    pub owner_email: String,
    pub tier: String,
    pub rate_limit: i32,
    pub quota_limit: Option<i64>,
    pub total_usage: i64,
}

impl From<&DbCredential> for CredentialAuth {
    fn from(credential: &DbCredential) -> Self {
        Self {
            credential_id: credential.id,
            owner_email: credential.owner_email.clone(),
            tier: credential.tier.clone(),
            rate_limit: credential.rate_limit,
            quota_limit: credential.quota_limit,
            total_usage: credential.total_usage,
        }
    }
}

/// Enterprise-tier gate for admin-only endpoints (credential management,
/// admin rate-limit reset), carried over from the teacher's tier check.
impl CredentialAuth {
    pub fn is_admin_tier(&self) -> bool {
        self.tier == "enterprise"
    }
}

pub trait CredentialAuthExt {
    fn credential_auth(&self) -> Option<CredentialAuth>;
}

impl<T: HttpMessage> CredentialAuthExt for T {
    fn credential_auth(&self) -> Option<CredentialAuth> {
        self.extensions().get::<CredentialAuth>().cloned()
    }
}
