//! Credential management endpoints.
//!
//! Mirrors the teacher's `handlers::keys` shape (create/list/get/revoke,
//! enterprise-tier admin gate) rewired onto `CredentialService` and the
//! full credential lifecycle (tiers, quotas, rotation) rather than a
//! single flat API-key row.

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::middleware::CredentialAuth;
use crate::db::credentials::{CreateCredentialRequest, DbCredential, Tier};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCredentialBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner_email: String,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default = "default_tier")]
    pub tier: String,
    #[serde(default)]
    pub rate_limit: Option<i32>,
    #[serde(default)]
    pub rate_window_secs: Option<i32>,
    #[serde(default)]
    pub quota_limit: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Json>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_tier() -> String {
    "free".to_string()
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateCredentialResponseBody {
    pub id: Uuid,
    pub secret: String,
    pub key_prefix: String,
    pub name: String,
    pub tier: String,
    pub rate_limit: i32,
    pub rate_window_secs: i32,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialInfo {
    pub id: Uuid,
    pub key_prefix: String,
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
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<DbCredential> for CredentialInfo {
    fn from(c: DbCredential) -> Self {
        Self {
            id: c.id,
            key_prefix: c.key_prefix,
            name: c.name,
            description: c.description,
            owner_email: c.owner_email,
            owner_name: c.owner_name,
            tier: c.tier,
            status: c.status,
            rate_limit: c.rate_limit,
            rate_window_secs: c.rate_window_secs,
            quota_limit: c.quota_limit,
            total_usage: c.total_usage,
            tags: c.tags,
            created_at: c.created_at,
            last_used_at: c.last_used_at,
            expires_at: c.expires_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListCredentialsResponse {
    pub credentials: Vec<CredentialInfo>,
    pub count: usize,
}

fn auth_from(req: &HttpRequest) -> Option<CredentialAuth> {
    req.extensions().get::<CredentialAuth>().cloned()
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({
        "error": "unauthorized",
        "message": "credential required"
    }))
}

fn forbidden(message: &str) -> HttpResponse {
    HttpResponse::Forbidden().json(serde_json::json!({
        "error": "forbidden",
        "message": message
    }))
}

/// POST /api/v1/credentials — enterprise-tier only, mirrors the
/// teacher's "only admin keys can create keys" gate.
#[utoipa::path(
    post,
    path = "/api/v1/credentials",
    tag = "credentials",
    request_body = CreateCredentialBody,
    responses(
        (status = 201, description = "Credential created; secret shown once", body = CreateCredentialResponseBody),
        (status = 403, description = "Caller is not enterprise-tier"),
    )
)]
pub async fn create_credential(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateCredentialBody>,
) -> HttpResponse {
    let auth = match auth_from(&req) {
        Some(auth) if auth.is_admin_tier() => auth,
        Some(_) => return forbidden("only enterprise tier credentials can create new credentials"),
        None => return unauthorized(),
    };

    let request = CreateCredentialRequest {
        name: body.name.clone(),
        description: body.description.clone(),
        owner_email: body.owner_email.clone(),
        owner_name: body.owner_name.clone(),
        tier: Tier::from_str(&body.tier),
        rate_limit: body.rate_limit,
        rate_window_secs: body.rate_window_secs,
        quota_limit: body.quota_limit,
        tags: body.tags.clone(),
        metadata: body.metadata.clone().unwrap_or(Json::Null),
        expires_at: body.expires_at,
    };

    match state.credential_service.create(request).await {
        Ok(response) => {
            tracing::info!(
                credential_id = %response.id,
                created_by = %auth.credential_id,
                "credential created"
            );
            HttpResponse::Created().json(CreateCredentialResponseBody {
                id: response.id,
                secret: response.secret,
                key_prefix: response.key_prefix,
                name: response.name,
                tier: response.tier,
                rate_limit: response.rate_limit,
                rate_window_secs: response.rate_window_secs,
                message: "credential created successfully, save the secret now: it will not be shown again".to_string(),
            })
        }
        Err(e) => e.error_response(),
    }
}

/// GET /api/v1/credentials/me
#[utoipa::path(
    get,
    path = "/api/v1/credentials/me",
    tag = "credentials",
    responses(
        (status = 200, description = "The caller's own credential", body = CredentialInfo),
        (status = 401, description = "No credential presented"),
    )
)]
pub async fn get_my_credential(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };
    match state.credential_service.get(auth.credential_id).await {
        Ok(credential) => HttpResponse::Ok().json(CredentialInfo::from(credential)),
        Err(e) => e.error_response(),
    }
}

/// GET /api/v1/credentials/{id} — enterprise tier only.
pub async fn get_credential_by_id(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    match auth_from(&req) {
        Some(auth) if auth.is_admin_tier() => {}
        Some(_) => return forbidden("only enterprise tier credentials can view other credentials"),
        None => return unauthorized(),
    }

    match state.credential_service.get(path.into_inner()).await {
        Ok(credential) => HttpResponse::Ok().json(CredentialInfo::from(credential)),
        Err(e) => e.error_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListCredentialsQuery {
    pub owner_email: Option<String>,
}

/// GET /api/v1/credentials?owner_email=xxx — non-admins only ever see
/// their own owner's credentials, regardless of the query param.
pub async fn list_credentials(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListCredentialsQuery>,
) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };

    let owner_email = if auth.is_admin_tier() {
        query.owner_email.clone().unwrap_or_else(|| auth.owner_email.clone())
    } else {
        auth.owner_email.clone()
    };

    match state.credential_service.list(&owner_email).await {
        Ok(credentials) => {
            let credentials: Vec<CredentialInfo> = credentials.into_iter().map(CredentialInfo::from).collect();
            let count = credentials.len();
            HttpResponse::Ok().json(ListCredentialsResponse { credentials, count })
        }
        Err(e) => e.error_response(),
    }
}

/// DELETE /api/v1/credentials/{id} — owner or enterprise-tier admin.
pub async fn revoke_credential(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };
    let credential_id = path.into_inner();

    if !auth.is_admin_tier() {
        match state.credential_service.get(credential_id).await {
            Ok(credential) if credential.owner_email == auth.owner_email => {}
            Ok(_) => return forbidden("you can only revoke your own credentials"),
            Err(e) => return e.error_response(),
        }
    }

    match state.credential_service.soft_delete(credential_id).await {
        Ok(()) => {
            tracing::info!(%credential_id, revoked_by = %auth.credential_id, "credential revoked");
            HttpResponse::Ok().json(serde_json::json!({
                "message": "credential revoked successfully",
                "credential_id": credential_id
            }))
        }
        Err(e) => e.error_response(),
    }
}

/// POST /api/v1/credentials/{id}/rotate — owner or enterprise-tier admin.
pub async fn rotate_credential(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };
    let credential_id = path.into_inner();

    if !auth.is_admin_tier() {
        match state.credential_service.get(credential_id).await {
            Ok(credential) if credential.owner_email == auth.owner_email => {}
            Ok(_) => return forbidden("you can only rotate your own credentials"),
            Err(e) => return e.error_response(),
        }
    }

    match state.credential_service.rotate(credential_id).await {
        Ok(secret) => HttpResponse::Ok().json(serde_json::json!({
            "credential_id": credential_id,
            "secret": secret,
            "message": "credential rotated, save the secret now: it will not be shown again"
        })),
        Err(e) => e.error_response(),
    }
}

/// POST /api/v1/admin/reset/{id} — enterprise tier only, clears the
/// counter window for a credential (spec §4.1 `Reset`).
pub async fn reset_rate_limit(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    match auth_from(&req) {
        Some(auth) if auth.is_admin_tier() => {}
        Some(_) => return forbidden("only enterprise tier credentials can reset rate limits"),
        None => return unauthorized(),
    }

    let credential_id = path.into_inner();
    match state.engine.reset("default", credential_id).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": "rate limit counter reset",
            "credential_id": credential_id
        })),
        Err(e) => crate::error::ServiceError::from(e).error_response(),
    }
}
