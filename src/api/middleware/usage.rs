//! Request metadata extraction shared by the rate-limit middleware when
//! it builds a `UsageRecord` for the Usage Recorder.

use actix_web::dev::ServiceRequest;
use std::net::IpAddr;
use std::time::Instant;

#[derive(Clone, Debug)]
pub struct RequestTiming {
    pub start: Instant,
}

impl RequestTiming {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_ms(&self) -> i32 {
        self.start.elapsed().as_millis() as i32
    }
}

impl Default for RequestTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefers `X-Forwarded-For` / `X-Real-IP` (proxied deployments) before
/// falling back to the raw peer address.
pub fn extract_client_ip(req: &ServiceRequest) -> Option<IpAddr> {
    if let Some(forwarded) = req.headers().get("X-Forwarded-For") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("X-Real-IP") {
        if let Ok(ip_str) = real_ip.to_str() {
            if let Ok(ip) = ip_str.parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    req.peer_addr().map(|addr| addr.ip())
}

pub fn extract_user_agent(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("User-Agent")
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.chars().take(500).collect())
}
