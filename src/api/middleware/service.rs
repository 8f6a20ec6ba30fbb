//! API Middleware Service
//!
//! Combines credential validation, rate-limit decisioning, and usage
//! capture into a single `actix_service::Transform`, following the
//! teacher's `ApiMiddleware`/`ApiMiddlewareService` pair in
//! `api/middleware/service.rs` — generalized from a direct `DbPool` held
//! by the middleware to pulling `AppState` out of `req.app_data()`, since
//! the service layer underneath (`CredentialService`, `RateLimitEngine`,
//! `UsageRecorder`) is now itself async and stateful.

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage, HttpResponse, ResponseError,
};
use chrono::Utc;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::time::Instant;
use tracing::warn;

use crate::db::usage::UsageRecord;
use crate::db::violations::Violation;
use crate::AppState;

use super::auth::{extract_secret, CredentialAuth};
use super::rate_limit::{apply_headers, denied_body};
use super::usage::{extract_client_ip, extract_user_agent};

pub struct ApiMiddleware {
    public_paths: Vec<String>,
}

impl ApiMiddleware {
    pub fn new() -> Self {
        Self {
            public_paths: vec![
                "/health".to_string(),
                "/swagger-ui".to_string(),
                "/api-docs".to_string(),
            ],
        }
    }
}

impl Default for ApiMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Transform = ApiMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(ApiMiddlewareService {
            service: Rc::new(service),
            public_paths: self.public_paths.clone(),
        })
    }
}

pub struct ApiMiddlewareService<S> {
    service: Rc<S>,
    public_paths: Vec<String>,
}

impl<S> ApiMiddlewareService<S> {
    fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p))
    }
}

impl<S, B> Service<ServiceRequest> for ApiMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut core::task::Context<'_>) -> core::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let is_public = self.is_public_path(req.path());

        Box::pin(async move {
            if is_public {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
                let response = HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal",
                    "message": "application state not configured"
                }));
                return Ok(req.into_response(response).map_into_right_body());
            };

            let Some(secret) = extract_secret(&req) else {
                let response = HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "credential required via X-API-Key header or Authorization: Bearer <secret>"
                }));
                return Ok(req.into_response(response).map_into_right_body());
            };

            let credential = match state.credential_service.validate(&secret).await {
                Ok(credential) => credential,
                Err(e) => return Ok(req.into_response(e.error_response()).map_into_right_body()),
            };

            let (limit, window) = state.credential_service.effective_limit(&credential);
            let now = Utc::now();
            let decision = state
                .engine
                .decide("default", credential.id, limit, window, 1, now)
                .await;

            // A backend-error decision is a fail-policy fallback, not a real
            // rate-limit verdict (spec.md §4.1/§7): it maps to `backend_unavailable`
            // / 503, never emits a `Violation`, but still lands a usage record so
            // the `consecutive_failures` alert rule has something to observe.
            if decision.backend_error {
                let endpoint = req.path().to_string();
                let method = req.method().to_string();
                let client_ip = extract_client_ip(&req);
                let user_agent = extract_user_agent(&req);

                let error = crate::error::ServiceError::backend_unavailable("rate limit backend unavailable");
                let response = error.error_response();
                let status_code = response.status().as_u16() as i32;

                state.recorder.record(UsageRecord {
                    credential_id: credential.id,
                    endpoint,
                    method,
                    status_code,
                    response_time_ms: 0,
                    request_size: 0,
                    response_size: 0,
                    client_ip,
                    user_agent,
                    country: None,
                    timestamp: now,
                });

                return Ok(req.into_response(response).map_into_right_body());
            }

            if !decision.allowed {
                let endpoint = req.path().to_string();
                let method = req.method().to_string();
                let client_ip = extract_client_ip(&req);
                let violation_repo = state.violation_repo.clone();
                let credential_id = credential.id;
                let window_seconds = (decision.window_end - decision.window_start).num_seconds().max(1) as i32;
                tokio::spawn(async move {
                    let violation = Violation {
                        credential_id,
                        endpoint,
                        method,
                        client_ip,
                        observed_count: decision.used as i64,
                        limit_value: decision.limit as i64,
                        window_seconds,
                        timestamp: now,
                    };
                    if let Err(e) = violation_repo.record(&violation).await {
                        warn!(error = %e, %credential_id, "failed to record rate-limit violation");
                    }
                });

                let response = HttpResponse::TooManyRequests().json(denied_body(&decision));
                let mut res = req.into_response(response).map_into_right_body();
                apply_headers(&mut res, &decision);
                return Ok(res);
            }

            let endpoint = req.path().to_string();
            let method = req.method().to_string();
            let client_ip = extract_client_ip(&req);
            let user_agent = extract_user_agent(&req);
            let request_size = req
                .headers()
                .get("Content-Length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);

            req.extensions_mut().insert(CredentialAuth::from(&credential));

            let start = Instant::now();
            let res = service.call(req).await?;
            let response_time_ms = start.elapsed().as_millis() as i32;
            let status_code = res.status().as_u16() as i32;
            let response_size = res
                .response()
                .headers()
                .get("Content-Length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);

            state.recorder.record(UsageRecord {
                credential_id: credential.id,
                endpoint,
                method,
                status_code,
                response_time_ms,
                request_size,
                response_size,
                client_ip,
                user_agent,
                country: None,
                timestamp: now,
            });

            let mut res = res.map_into_left_body();
            apply_headers(&mut res, &decision);
            Ok(res)
        })
    }
}
