//! Aggregators (C8) — usage rollup, alert evaluation, billing rollup,
//! and retention sweep. Each is registered with the `TaskDispatcher` as a
//! handler for its task type, following the teacher's
//! `#[instrument]`-annotated async-fn-with-typed-error style
//! (`sync::orchestrator::start_full_sync` / `sync_product`).

pub mod alerts;
pub mod billing;
pub mod retention;
pub mod usage_rollup;

use async_trait::async_trait;

/// Notification transport port (spec §1 Out-of-scope: "notification
/// transport (email/slack/webhook) — treated as an `AlertSink` port").
/// Concrete transports are external collaborators; this crate ships only
/// a logging sink, matching the teacher's tracing-first observability
/// posture.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &crate::db::alerts::NewAlert);
}

pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, alert: &crate::db::alerts::NewAlert) {
        tracing::warn!(
            credential_id = %alert.credential_id,
            alert_type = %alert.alert_type,
            severity = alert.severity.as_str(),
            message = %alert.message,
            "alert fired"
        );
    }
}
