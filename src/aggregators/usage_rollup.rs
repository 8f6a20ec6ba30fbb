//! Usage Rollup aggregator (spec §4.5) — consumes the log's most recent
//! window, computes per-credential counts and response-time percentiles,
//! and writes precomputed minute/hour/day summaries for cheap reads.
//! Registered with the `TaskDispatcher` under the `usage_rollup` task
//! type; the scheduler drives it at all three granularities on their
//! own cadences (`src/dispatcher/scheduler.rs`).

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as Json;
use tracing::{info, instrument};

use crate::db::usage::{UsageRepository, UsageSummary};

pub struct UsageRollup {
    usage_repo: Arc<UsageRepository>,
}

impl UsageRollup {
    pub fn new(usage_repo: Arc<UsageRepository>) -> Self {
        Self { usage_repo }
    }

    /// Handler body for the `usage_rollup` task; idempotent for a given
    /// `(granularity, period)` since it always recomputes and upserts,
    /// never appends.
    #[instrument(skip(self, payload))]
    pub async fn run(&self, payload: Json) -> Result<(), String> {
        let (granularity, period_start) = parse_period(&payload)?;
        let window = granularity_window(&granularity)?;
        let period_end = period_start + window;

        let credential_ids = self
            .usage_repo
            .active_credential_ids_since(period_start)
            .await
            .map_err(|e| e.to_string())?;

        for credential_id in credential_ids {
            let (total, error_rate) = self
                .usage_repo
                .count_and_error_rate(credential_id, period_start, period_end)
                .await
                .map_err(|e| e.to_string())?;
            let (p50, p95, p99) = self
                .usage_repo
                .response_time_percentiles(credential_id, period_start)
                .await
                .map_err(|e| e.to_string())?;

            self.usage_repo
                .upsert_summary(&UsageSummary {
                    credential_id,
                    granularity: granularity.clone(),
                    period_start,
                    total_requests: total,
                    error_rate,
                    p50_response_time_ms: p50,
                    p95_response_time_ms: p95,
                    p99_response_time_ms: p99,
                })
                .await
                .map_err(|e| e.to_string())?;
        }

        info!(%granularity, period = %period_start, "usage rollup complete");
        Ok(())
    }
}

/// Window length for one rollup period at a given granularity.
fn granularity_window(granularity: &str) -> Result<ChronoDuration, String> {
    match granularity {
        "minute" => Ok(ChronoDuration::minutes(1)),
        "hour" => Ok(ChronoDuration::hours(1)),
        "day" => Ok(ChronoDuration::days(1)),
        other => Err(format!("unknown granularity: {other}")),
    }
}

/// Parses `{"granularity": "minute"|"hour"|"day", "period": "..."}` into
/// the granularity and the period's start instant. `period` is truncated
/// to the precision implied by its granularity (minute: `HH:MM`, hour:
/// `HH`, day: date only) since that's what the scheduler enqueues at
/// each boundary.
fn parse_period(payload: &Json) -> Result<(String, DateTime<Utc>), String> {
    let granularity = payload
        .get("granularity")
        .and_then(|v| v.as_str())
        .unwrap_or("minute")
        .to_string();
    let period = payload
        .get("period")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing period".to_string())?;

    let rfc3339 = match granularity.as_str() {
        "minute" => format!("{period}:00Z"),
        "hour" => format!("{period}:00:00Z"),
        "day" => format!("{period}T00:00:00Z"),
        other => return Err(format!("unknown granularity: {other}")),
    };

    let period_start = DateTime::parse_from_rfc3339(&rfc3339)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())?;
    Ok((granularity, period_start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_period() {
        let payload = serde_json::json!({ "granularity": "minute", "period": "2026-01-02T03:04" });
        let (granularity, parsed) = parse_period(&payload).unwrap();
        assert_eq!(granularity, "minute");
        assert_eq!(parsed.format("%Y-%m-%dT%H:%M").to_string(), "2026-01-02T03:04");
    }

    #[test]
    fn parses_hour_period() {
        let payload = serde_json::json!({ "granularity": "hour", "period": "2026-01-02T03" });
        let (granularity, parsed) = parse_period(&payload).unwrap();
        assert_eq!(granularity, "hour");
        assert_eq!(parsed.format("%Y-%m-%dT%H:%M").to_string(), "2026-01-02T03:00");
    }

    #[test]
    fn parses_day_period() {
        let payload = serde_json::json!({ "granularity": "day", "period": "2026-01-02" });
        let (granularity, parsed) = parse_period(&payload).unwrap();
        assert_eq!(granularity, "day");
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2026-01-02 00:00");
    }

    #[test]
    fn defaults_to_minute_granularity() {
        let payload = serde_json::json!({ "period": "2026-01-02T03:04" });
        let (granularity, _) = parse_period(&payload).unwrap();
        assert_eq!(granularity, "minute");
    }

    #[test]
    fn missing_period_is_an_error() {
        assert!(parse_period(&serde_json::json!({ "granularity": "minute" })).is_err());
    }

    #[test]
    fn unknown_granularity_is_an_error() {
        let payload = serde_json::json!({ "granularity": "fortnight", "period": "2026-01-02" });
        assert!(parse_period(&payload).is_err());
    }
}
