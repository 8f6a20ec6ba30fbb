//! OpenAPI 3.0 specification

use utoipa::OpenApi;

use crate::api::handlers::alerts::AlertsResponse;
use crate::api::handlers::billing::{BillingPreview, BillingSummaryResponse};
use crate::api::handlers::credentials::{CreateCredentialBody, CreateCredentialResponseBody, CredentialInfo};
use crate::api::handlers::health::HealthResponse;
use crate::api::handlers::usage::{QuotaInfo, UsageStatsResponse};
use crate::db::alerts::{DbAlert, Severity};
use crate::db::billing::{BillingRecord, BillingStatus};
use crate::db::usage::MonthlyUsageSummary;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Viva API",
        version = "1.0.0",
        description = "Distributed API-key-aware rate limiting and usage accounting service",
        contact(name = "API Support", email = "support@example.com"),
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "/", description = "Current server")),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "credentials", description = "Credential lifecycle endpoints"),
        (name = "usage", description = "Usage statistics endpoints"),
        (name = "billing", description = "Billing summary and ledger endpoints"),
        (name = "alerts", description = "Alert inspection and resolution endpoints")
    ),
    paths(
        crate::api::handlers::health::health_check,
        crate::api::handlers::credentials::create_credential,
        crate::api::handlers::credentials::get_my_credential,
        crate::api::handlers::usage::get_usage_stats,
        crate::api::handlers::billing::get_billing_summary,
        crate::api::handlers::alerts::list_alerts,
    ),
    components(schemas(
        HealthResponse,
        CreateCredentialBody,
        CreateCredentialResponseBody,
        CredentialInfo,
        UsageStatsResponse,
        QuotaInfo,
        MonthlyUsageSummary,
        BillingSummaryResponse,
        BillingPreview,
        BillingRecord,
        BillingStatus,
        AlertsResponse,
        DbAlert,
        Severity,
    ))
)]
pub struct ApiDoc;
