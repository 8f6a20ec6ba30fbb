//! Usage statistics endpoints.

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::middleware::CredentialAuth;
use crate::db::usage::{MonthlyUsageSummary, UsageStats};
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct UsageStatsResponse {
    pub credential_id: Uuid,
    pub tier: String,
    pub current_month: MonthlyUsageSummary,
    pub quota: QuotaInfo,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QuotaInfo {
    pub quota_limit: Option<i64>,
    pub used: i64,
    pub remaining: Option<i64>,
    pub percentage_used: Option<f64>,
    pub is_exceeded: bool,
}

impl From<UsageStats> for QuotaInfo {
    fn from(stats: UsageStats) -> Self {
        Self {
            quota_limit: stats.quota_limit,
            used: stats.quota_used,
            remaining: stats.quota_remaining,
            percentage_used: stats.quota_percentage_used,
            is_exceeded: stats.quota_remaining.map(|r| r <= 0).unwrap_or(false),
        }
    }
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

/// GET /api/v1/usage
#[utoipa::path(
    get,
    path = "/api/v1/usage",
    tag = "usage",
    responses(
        (status = 200, description = "Current month usage and quota state", body = UsageStatsResponse),
        (status = 401, description = "No credential presented"),
    )
)]
pub async fn get_usage_stats(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };

    match state
        .usage_repo
        .get_usage_stats(auth.credential_id, auth.quota_limit, auth.total_usage)
        .await
    {
        Ok(stats) => HttpResponse::Ok().json(UsageStatsResponse {
            credential_id: auth.credential_id,
            tier: auth.tier,
            current_month: stats.current_month.clone(),
            quota: QuotaInfo::from(stats),
        }),
        Err(e) => crate::error::ServiceError::from(e).error_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UsageHistoryQuery {
    #[serde(default = "default_months")]
    pub months: i32,
}

fn default_months() -> i32 {
    6
}

#[derive(Debug, Serialize)]
pub struct UsageHistoryResponse {
    pub credential_id: Uuid,
    pub months: Vec<MonthlyUsageSummary>,
}

/// GET /api/v1/usage/history?months=6
pub async fn get_usage_history(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<UsageHistoryQuery>,
) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };
    let months = query.months.clamp(1, 24);

    match state.usage_repo.get_monthly_history(auth.credential_id, months).await {
        Ok(history) => HttpResponse::Ok().json(UsageHistoryResponse {
            credential_id: auth.credential_id,
            months: history,
        }),
        Err(e) => crate::error::ServiceError::from(e).error_response(),
    }
}

/// GET /api/v1/usage/month/{year_month}
pub async fn get_month_usage(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };
    let year_month = path.into_inner();

    if !is_valid_year_month(&year_month) {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "invalid_input",
            "message": "year-month must be in YYYY-MM format"
        }));
    }

    match state.usage_repo.get_monthly_history(auth.credential_id, 24).await {
        Ok(history) => {
            let month = history.into_iter().find(|m| m.year_month == year_month).unwrap_or(MonthlyUsageSummary {
                year_month: year_month.clone(),
                total_requests: 0,
                successful_requests: 0,
                failed_requests: 0,
                avg_response_time_ms: 0.0,
            });
            HttpResponse::Ok().json(month)
        }
        Err(e) => crate::error::ServiceError::from(e).error_response(),
    }
}

fn is_valid_year_month(s: &str) -> bool {
    if s.len() != 7 {
        return false;
    }
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 2 {
        return false;
    }
    match (parts[0].parse::<i32>(), parts[1].parse::<u32>()) {
        (Ok(y), Ok(m)) => (2020..=2100).contains(&y) && (1..=12).contains(&m),
        _ => false,
    }
}
