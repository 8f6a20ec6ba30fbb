//! Billing Rollup (spec §4.5) — for each closed day-period, sums usage
//! from the Usage Log Store and writes a `pending` `BillingRecord`.
//! Periods per credential tile continuously: each run picks up wherever
//! the last recorded period left off rather than trusting the scheduler's
//! date alone, so a missed tick never leaves a gap.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde_json::Value as Json;
use tracing::{info, instrument, warn};

use crate::config::{TierDefault, TierSettings};
use crate::db::billing::{BillingRecord, BillingRepository};
use crate::db::credentials::{CredentialRepository, DbCredential, Tier};
use crate::db::usage::UsageRepository;

pub struct BillingRollup {
    credential_repo: Arc<CredentialRepository>,
    usage_repo: Arc<UsageRepository>,
    billing_repo: Arc<BillingRepository>,
    tiers: TierSettings,
}

impl BillingRollup {
    pub fn new(
        credential_repo: Arc<CredentialRepository>,
        usage_repo: Arc<UsageRepository>,
        billing_repo: Arc<BillingRepository>,
        tiers: TierSettings,
    ) -> Self {
        Self {
            credential_repo,
            usage_repo,
            billing_repo,
            tiers,
        }
    }

    #[instrument(skip(self, payload))]
    pub async fn run(&self, payload: Json) -> Result<(), String> {
        let horizon = parse_date(&payload)?;

        let credentials = self.credential_repo.list_active().await.map_err(|e| e.to_string())?;
        for credential in credentials {
            if let Err(e) = self.roll_credential(&credential, horizon).await {
                warn!(credential_id = %credential.id, error = %e, "billing rollup failed for credential");
            }
        }
        Ok(())
    }

    /// Bills every whole day-period for `credential` up to (but not
    /// including) `horizon`, starting from the day after its last billed
    /// period (or its creation date if never billed).
    async fn roll_credential(&self, credential: &DbCredential, horizon: DateTime<Utc>) -> Result<(), String> {
        let mut period_start = self
            .billing_repo
            .last_period_end(credential.id)
            .await
            .map_err(|e| e.to_string())?
            .unwrap_or_else(|| start_of_day(credential.created_at));

        while period_start + ChronoDuration::days(1) <= horizon {
            let period_end = period_start + ChronoDuration::days(1);
            let (total_requests, _error_rate) = self
                .usage_repo
                .count_and_error_rate(credential.id, period_start, period_end)
                .await
                .map_err(|e| e.to_string())?;

            let tier = tier_default(&self.tiers, credential.tier_enum());
            let included = credential.quota_limit.unwrap_or(tier.monthly_quota as i64);
            let overage_requests = (total_requests - included).max(0);
            let overage_amount = overage_requests as f64 * tier.overage_rate_per_1000 / 1000.0;

            let record = BillingRecord {
                credential_id: credential.id,
                period_start,
                period_end,
                total_requests,
                overage_requests,
                base_amount: tier.base_price,
                overage_amount,
                currency: "USD".to_string(),
            };

            self.billing_repo.insert(&record).await.map_err(|e| e.to_string())?;
            info!(
                credential_id = %credential.id,
                %period_start,
                total_requests,
                overage_requests,
                total_amount = record.total_amount(),
                "billing period closed"
            );

            period_start = period_end;
        }

        Ok(())
    }
}

fn tier_default(tiers: &TierSettings, tier: Tier) -> &TierDefault {
    match tier {
        Tier::Free => &tiers.free,
        Tier::Basic => &tiers.basic,
        Tier::Standard => &tiers.standard,
        Tier::Pro => &tiers.pro,
        Tier::Enterprise => &tiers.enterprise,
    }
}

fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts.date_naive().and_hms_opt(0, 0, 0).unwrap())
}

fn parse_date(payload: &Json) -> Result<DateTime<Utc>, String> {
    let s = payload
        .get("date")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing date".to_string())?;
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| e.to_string())?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overage_formula_matches_spec_scenario() {
        // tier included=10_000, rate=$0.008/1k, usage=12_000 -> $0.016 (16 millis).
        let total_requests = 12_000i64;
        let included = 10_000i64;
        let rate_per_1000 = 0.008;
        let overage_requests = (total_requests - included).max(0);
        let overage_amount = overage_requests as f64 * rate_per_1000 / 1000.0;
        assert_eq!(overage_requests, 2_000);
        assert!((overage_amount - 0.016).abs() < 1e-9);
    }

    #[test]
    fn parses_date_payload() {
        let payload = serde_json::json!({ "date": "2026-01-02" });
        let parsed = parse_date(&payload).unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2026-01-02");
    }
}
