//! Rate-limit response headers, shared by the middleware and the `/usage`
//! handlers. Header names match spec.md §6 exactly.

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::ServiceResponse,
    http::header::{HeaderName, HeaderValue},
};

use crate::ratelimit::Decision;

pub const RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";
pub const RETRY_AFTER: &str = "Retry-After";

/// Inserts `X-RateLimit-*` headers on an allowed response, matching
/// spec.md §6's header contract.
pub fn apply_headers<B>(res: &mut ServiceResponse<EitherBody<B, BoxBody>>, decision: &Decision) {
    let headers = res.headers_mut();
    if let Ok(name) = HeaderName::try_from(RATE_LIMIT_LIMIT) {
        headers.insert(name, HeaderValue::from(decision.limit));
    }
    if let Ok(name) = HeaderName::try_from(RATE_LIMIT_REMAINING) {
        headers.insert(name, HeaderValue::from(decision.remaining));
    }
    if let Ok(name) = HeaderName::try_from(RATE_LIMIT_RESET) {
        if let Ok(val) = HeaderValue::try_from(decision.window_end.timestamp().to_string()) {
            headers.insert(name, val);
        }
    }
}

/// The 429 body shape for a denied decision.
pub fn denied_body(decision: &Decision) -> serde_json::Value {
    let retry_after = decision.retry_after.map(|d| d.as_secs()).unwrap_or(1);
    serde_json::json!({
        "error": "rate_limited",
        "message": format!("rate limit exceeded: {} requests per window", decision.limit),
        "limit": decision.limit,
        "remaining": decision.remaining,
        "retry_after_seconds": retry_after,
    })
}
