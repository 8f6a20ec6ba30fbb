//! Alert endpoints — surfaces the Alert Evaluator's (C8) findings and
//! lets an owner or enterprise-tier admin acknowledge them.

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::middleware::CredentialAuth;
use crate::db::alerts::DbAlert;
use crate::AppState;

fn auth_from(req: &HttpRequest) -> Option<CredentialAuth> {
    req.extensions().get::<CredentialAuth>().cloned()
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({
        "error": "unauthorized",
        "message": "credential required"
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AlertsResponse {
    pub credential_id: Uuid,
    pub alerts: Vec<DbAlert>,
}

/// GET /api/v1/alerts — unresolved alerts for the caller's own credential.
#[utoipa::path(
    get,
    path = "/api/v1/alerts",
    tag = "alerts",
    responses(
        (status = 200, description = "Unresolved alerts for the caller's credential", body = AlertsResponse),
        (status = 401, description = "No credential presented"),
    )
)]
pub async fn list_alerts(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };

    match state.alert_repo.list_unresolved(auth.credential_id).await {
        Ok(alerts) => HttpResponse::Ok().json(AlertsResponse {
            credential_id: auth.credential_id,
            alerts,
        }),
        Err(e) => crate::error::ServiceError::from(e).error_response(),
    }
}

/// POST /api/v1/alerts/{id}/resolve
pub async fn resolve_alert(req: HttpRequest, state: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };
    let alert_id = path.into_inner();

    match state.alert_repo.resolve(alert_id, &auth.owner_email).await {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({
            "message": "alert resolved",
            "alert_id": alert_id
        })),
        Ok(false) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "not_found",
            "message": "alert not found or already resolved"
        })),
        Err(e) => crate::error::ServiceError::from(e).error_response(),
    }
}
