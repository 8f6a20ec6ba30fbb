//! API Middleware Module
//!
//! Credential authentication, rate limiting, and usage capture for every
//! non-public route.

pub mod auth;
pub mod rate_limit;
pub mod usage;
pub mod service;

pub use auth::{extract_secret, CredentialAuth, CredentialAuthExt, API_KEY_HEADER};
pub use rate_limit::{
    apply_headers, denied_body, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET, RETRY_AFTER,
};
pub use usage::{extract_client_ip, extract_user_agent, RequestTiming};
pub use service::ApiMiddleware;
