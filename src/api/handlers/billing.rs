//! Billing endpoints — a cheap on-the-fly preview of the current period
//! plus the persisted, aggregator-written ledger.

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::middleware::CredentialAuth;
use crate::db::billing::BillingRecord;
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
pub struct BillingSummaryResponse {
    pub credential_id: Uuid,
    pub tier: String,
    pub current_period: BillingPreview,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BillingPreview {
    pub requests_this_month: i64,
    pub included_requests: i64,
    pub overage_requests: i64,
    pub base_amount: f64,
    pub overage_amount: f64,
    pub estimated_total: f64,
    pub currency: &'static str,
}

/// GET /api/v1/billing/summary — estimates the current, not-yet-rolled
/// period from the live month-to-date usage count rather than waiting
/// for the next billing rollup run.
#[utoipa::path(
    get,
    path = "/api/v1/billing/summary",
    tag = "billing",
    responses(
        (status = 200, description = "Live preview of the current billing period", body = BillingSummaryResponse),
        (status = 401, description = "No credential presented"),
    )
)]
pub async fn get_billing_summary(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };

    let stats = match state
        .usage_repo
        .get_usage_stats(auth.credential_id, auth.quota_limit, auth.total_usage)
        .await
    {
        Ok(stats) => stats,
        Err(e) => return crate::error::ServiceError::from(e).error_response(),
    };

    let tier_profile = state
        .credential_service
        .tier_profile(crate::db::credentials::Tier::from_str(&auth.tier));

    let requests_this_month = stats.current_month.total_requests;
    let included = tier_profile.monthly_quota as i64;
    let overage_requests = (requests_this_month - included).max(0);
    let overage_amount = overage_requests as f64 * tier_profile.overage_rate_per_1000 / 1000.0;

    HttpResponse::Ok().json(BillingSummaryResponse {
        credential_id: auth.credential_id,
        tier: auth.tier,
        current_period: BillingPreview {
            requests_this_month,
            included_requests: included,
            overage_requests,
            base_amount: tier_profile.base_price,
            overage_amount,
            estimated_total: tier_profile.base_price + overage_amount,
            currency: "USD",
        },
    })
}

#[derive(Debug, Serialize)]
pub struct BillingRecordsResponse {
    pub credential_id: Uuid,
    pub records: Vec<BillingRecord>,
}

/// GET /api/v1/billing/records — the persisted, per-day ledger written
/// by the Billing Rollup aggregator.
pub async fn list_billing_records(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(auth) = auth_from(&req) else { return unauthorized() };

    match state.billing_repo.list_for_credential(auth.credential_id, 90).await {
        Ok(records) => HttpResponse::Ok().json(BillingRecordsResponse {
            credential_id: auth.credential_id,
            records,
        }),
        Err(e) => crate::error::ServiceError::from(e).error_response(),
    }
}
