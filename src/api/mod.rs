//! API module - HTTP routes and handlers

pub mod handlers;
pub mod middleware;
pub mod openapi;

use actix_web::web;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Configure all API routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::scope("/credentials")
                    .route("", web::post().to(handlers::credentials::create_credential))
                    .route("", web::get().to(handlers::credentials::list_credentials))
                    .route("/me", web::get().to(handlers::credentials::get_my_credential))
                    .route("/{id}", web::get().to(handlers::credentials::get_credential_by_id))
                    .route("/{id}", web::delete().to(handlers::credentials::revoke_credential))
                    .route("/{id}/rotate", web::post().to(handlers::credentials::rotate_credential)),
            )
            .service(
                web::scope("/usage")
                    .route("", web::get().to(handlers::usage::get_usage_stats))
                    .route("/history", web::get().to(handlers::usage::get_usage_history))
                    .route("/month/{year_month}", web::get().to(handlers::usage::get_month_usage)),
            )
            .service(
                web::scope("/billing")
                    .route("/summary", web::get().to(handlers::billing::get_billing_summary))
                    .route("/records", web::get().to(handlers::billing::list_billing_records)),
            )
            .service(
                web::scope("/alerts")
                    .route("", web::get().to(handlers::alerts::list_alerts))
                    .route("/{id}/resolve", web::post().to(handlers::alerts::resolve_alert)),
            )
            .service(
                web::scope("/admin")
                    .route("/reset/{id}", web::post().to(handlers::credentials::reset_rate_limit)),
            ),
    )
    .route("/health", web::get().to(handlers::health::health_check))
    .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()));
}
