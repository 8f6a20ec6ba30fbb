//! Alert Evaluator (spec §4.5) — for each active credential, evaluates a
//! fixed set of rules against the last `window_minutes` of usage and
//! violations, firing at most once per `(credential, rule, cooldown)`.
//! Forwards fired alerts to the `AlertSink` port.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value as Json};
use tracing::{info, instrument, warn};

use crate::db::alerts::{AlertRepository, NewAlert, Severity};
use crate::db::credentials::CredentialRepository;
use crate::db::usage::UsageRepository;
use crate::db::violations::ViolationRepository;

use super::AlertSink;

/// One evaluable condition. Intentionally a closed set rather than a
/// user-authored DSL — spec §4.5 names exactly these five shapes.
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// More than `count` rate-limit violations in the window.
    ViolationThreshold { count: i64 },
    /// Usage at or above `percent` of the credential's `quota_limit`.
    QuotaPercent { percent: f64 },
    /// Error rate (status >= 400) at or above `percent` in the window.
    ErrorRatePercent { percent: f64 },
    /// Spike vs. the prior window's average, expressed as a multiplier.
    SpikeMultiplier { multiplier: f64 },
    /// The most recent `count` requests all failed (status >= 500) —
    /// the only signal available for a sustained counter-store outage,
    /// since those denials emit no `Violation` row (spec §4.1).
    ConsecutiveFailures { count: i64 },
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: &'static str,
    pub kind: RuleKind,
    pub severity: Severity,
    pub cooldown_minutes: i64,
}

/// Default rule set. Thresholds are deliberately conservative; operators
/// needing per-credential tuning would extend this via config in a
/// follow-up rather than embedding a rule DSL here.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            name: "violation_threshold",
            kind: RuleKind::ViolationThreshold { count: 20 },
            severity: Severity::Warning,
            cooldown_minutes: 15,
        },
        AlertRule {
            name: "quota_near_exhaustion",
            kind: RuleKind::QuotaPercent { percent: 90.0 },
            severity: Severity::Warning,
            cooldown_minutes: 60,
        },
        AlertRule {
            name: "elevated_error_rate",
            kind: RuleKind::ErrorRatePercent { percent: 25.0 },
            severity: Severity::Critical,
            cooldown_minutes: 10,
        },
        AlertRule {
            name: "traffic_spike",
            kind: RuleKind::SpikeMultiplier { multiplier: 5.0 },
            severity: Severity::Info,
            cooldown_minutes: 30,
        },
        AlertRule {
            name: "consecutive_failures",
            kind: RuleKind::ConsecutiveFailures { count: 5 },
            severity: Severity::Critical,
            cooldown_minutes: 5,
        },
    ]
}

pub struct AlertEvaluator {
    credential_repo: Arc<CredentialRepository>,
    usage_repo: Arc<UsageRepository>,
    violation_repo: Arc<ViolationRepository>,
    alert_repo: Arc<AlertRepository>,
    sink: Arc<dyn AlertSink>,
    rules: Vec<AlertRule>,
}

impl AlertEvaluator {
    pub fn new(
        credential_repo: Arc<CredentialRepository>,
        usage_repo: Arc<UsageRepository>,
        violation_repo: Arc<ViolationRepository>,
        alert_repo: Arc<AlertRepository>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            credential_repo,
            usage_repo,
            violation_repo,
            alert_repo,
            sink,
            rules: default_rules(),
        }
    }

    #[instrument(skip(self, payload))]
    pub async fn run(&self, payload: Json) -> Result<(), String> {
        let window_minutes = payload
            .get("window_minutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(5);
        let since = Utc::now() - ChronoDuration::minutes(window_minutes);

        let credentials = self.credential_repo.list_active().await.map_err(|e| e.to_string())?;
        for credential in credentials {
            if let Err(e) = self.evaluate_credential(credential.id, credential.quota_limit, credential.total_usage, since).await {
                warn!(credential_id = %credential.id, error = %e, "alert rule evaluation failed");
            }
        }
        Ok(())
    }

    async fn evaluate_credential(
        &self,
        credential_id: uuid::Uuid,
        quota_limit: Option<i64>,
        total_usage: i64,
        since: DateTime<Utc>,
    ) -> Result<(), String> {
        for rule in &self.rules {
            let fired = match &rule.kind {
                RuleKind::ViolationThreshold { count } => {
                    let violations = self
                        .violation_repo
                        .unprocessed_since(credential_id, since)
                        .await
                        .map_err(|e| e.to_string())?;
                    (violations.len() as i64) > *count
                }
                RuleKind::QuotaPercent { percent } => quota_limit
                    .filter(|&limit| limit > 0)
                    .map(|limit| (total_usage as f64 / limit as f64) * 100.0 >= *percent)
                    .unwrap_or(false),
                RuleKind::ErrorRatePercent { percent } => {
                    let (total, error_rate) = self
                        .usage_repo
                        .count_and_error_rate(credential_id, since, Utc::now())
                        .await
                        .map_err(|e| e.to_string())?;
                    total > 0 && error_rate * 100.0 >= *percent
                }
                RuleKind::SpikeMultiplier { multiplier } => {
                    let (recent, _) = self
                        .usage_repo
                        .count_and_error_rate(credential_id, since, Utc::now())
                        .await
                        .map_err(|e| e.to_string())?;
                    let baseline_since = since - ChronoDuration::minutes(60);
                    let (baseline, _) = self
                        .usage_repo
                        .count_and_error_rate(credential_id, baseline_since, since)
                        .await
                        .map_err(|e| e.to_string())?;
                    baseline > 0 && recent as f64 >= baseline as f64 * *multiplier
                }
                RuleKind::ConsecutiveFailures { count } => {
                    let recent = self
                        .usage_repo
                        .recent_status_codes(credential_id, *count)
                        .await
                        .map_err(|e| e.to_string())?;
                    recent.len() as i64 == *count && recent.iter().all(|&status| status >= 500)
                }
            };

            if !fired {
                continue;
            }

            let cooldown_start = Utc::now() - ChronoDuration::minutes(rule.cooldown_minutes);
            let already_fired = self
                .alert_repo
                .fired_within(credential_id, rule.name, cooldown_start)
                .await
                .map_err(|e| e.to_string())?;
            if already_fired {
                continue;
            }

            let alert = NewAlert {
                credential_id,
                alert_type: rule.name.to_string(),
                severity: rule.severity,
                message: format!("rule '{}' fired for credential {credential_id}", rule.name),
                metadata: json!({ "rule": rule.name }),
            };

            self.alert_repo.insert(&alert).await.map_err(|e| e.to_string())?;
            self.sink.send(&alert).await;
            info!(credential_id = %credential_id, rule = rule.name, "alert fired");
        }

        Ok(())
    }
}
