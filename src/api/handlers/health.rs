//! Health check endpoint.

use actix_web::{web, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub counter_backend: &'static str,
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "A dependency is unavailable", body = HealthResponse)
    )
)]
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let database = match state.db_pool.test_connection().await {
        Ok(()) => "up",
        Err(_) => "down",
    };

    let counter_backend = match state.settings.counter.backend {
        crate::config::CounterBackend::Memory => "memory",
        crate::config::CounterBackend::Shared => "shared",
    };

    let response = HealthResponse {
        status: if database == "up" { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        counter_backend,
    };

    if database == "up" {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
