//! Periodic scheduler — an in-process 1-minute ticker enqueuing the
//! recurring aggregation tasks, built on the usual
//! `tokio::spawn` + `tokio::time::interval` background-task idiom.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Timelike, Utc};
use serde_json::json;
use tracing::{info, warn};

use super::TaskDispatcher;
use crate::db::tasks::{NewTask, Priority};

const USAGE_ROLLUP: &str = "usage_rollup";
const ALERT_EVAL: &str = "alert_eval";
const BILLING_ROLLUP: &str = "billing_rollup";
const RETENTION_SWEEP: &str = "retention_sweep";
const CACHE_RECONCILE: &str = "cache_reconcile";
const EXPIRE_UNUSED: &str = "expire_unused";

/// Ticks every minute and enqueues tasks on their own cadence, each keyed
/// by a `dedupe_key` derived from its period so a missed tick and a
/// retried tick never double-enqueue the same period's work.
pub async fn run(dispatcher: Arc<TaskDispatcher>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;
        let now = Utc::now();

        if let Err(e) = enqueue_usage_rollup_minute(&dispatcher, now).await {
            warn!(error = %e, "failed to enqueue minute usage rollup task");
        }

        if now.minute() == 0 {
            if let Err(e) = enqueue_usage_rollup_hour(&dispatcher, now).await {
                warn!(error = %e, "failed to enqueue hour usage rollup task");
            }
        }

        if now.hour() == 0 && now.minute() == 0 {
            if let Err(e) = enqueue_usage_rollup_day(&dispatcher, now).await {
                warn!(error = %e, "failed to enqueue day usage rollup task");
            }
        }

        if now.minute() % 5 == 0 {
            if let Err(e) = enqueue_alert_eval(&dispatcher, now).await {
                warn!(error = %e, "failed to enqueue alert evaluation task");
            }
        }

        if now.hour() == 0 && now.minute() == 0 {
            if let Err(e) = enqueue_billing_rollup(&dispatcher, now).await {
                warn!(error = %e, "failed to enqueue billing rollup task");
            }
        }

        if now.hour() == 3 && now.minute() == 0 {
            if let Err(e) = enqueue_retention_sweep(&dispatcher, now).await {
                warn!(error = %e, "failed to enqueue retention sweep task");
            }
        }

        if now.hour() == 4 && now.minute() == 0 {
            if let Err(e) = enqueue_expire_unused(&dispatcher, now).await {
                warn!(error = %e, "failed to enqueue expire-unused task");
            }
        }

        if now.minute() % 10 == 0 {
            if let Err(e) = enqueue_cache_reconcile(&dispatcher, now).await {
                warn!(error = %e, "failed to enqueue cache reconciliation task");
            }
        }
    }
}

/// Enqueues the rollup for the minute that just closed (spec §4.5).
async fn enqueue_usage_rollup_minute(dispatcher: &TaskDispatcher, now: chrono::DateTime<Utc>) -> Result<(), crate::db::pool::DbError> {
    let period_start = now - ChronoDuration::minutes(1);
    let period = period_start.format("%Y-%m-%dT%H:%M").to_string();
    dispatcher
        .enqueue(NewTask {
            task_type: USAGE_ROLLUP.to_string(),
            priority: Priority::Default,
            payload: json!({ "granularity": "minute", "period": period }),
            dedupe_key: format!("{USAGE_ROLLUP}:minute:{period}"),
            not_before: now,
        })
        .await?;
    info!(period = %period, "enqueued minute usage rollup");
    Ok(())
}

/// Enqueues the rollup for the hour that just closed, fired once per
/// hour boundary alongside the minute cadence.
async fn enqueue_usage_rollup_hour(dispatcher: &TaskDispatcher, now: chrono::DateTime<Utc>) -> Result<(), crate::db::pool::DbError> {
    let period_start = now - ChronoDuration::hours(1);
    let period = period_start.format("%Y-%m-%dT%H").to_string();
    dispatcher
        .enqueue(NewTask {
            task_type: USAGE_ROLLUP.to_string(),
            priority: Priority::Default,
            payload: json!({ "granularity": "hour", "period": period }),
            dedupe_key: format!("{USAGE_ROLLUP}:hour:{period}"),
            not_before: now,
        })
        .await?;
    info!(period = %period, "enqueued hour usage rollup");
    Ok(())
}

/// Enqueues the rollup for the day that just closed, fired once at UTC
/// midnight.
async fn enqueue_usage_rollup_day(dispatcher: &TaskDispatcher, now: chrono::DateTime<Utc>) -> Result<(), crate::db::pool::DbError> {
    let period_start = now - ChronoDuration::days(1);
    let period = period_start.format("%Y-%m-%d").to_string();
    dispatcher
        .enqueue(NewTask {
            task_type: USAGE_ROLLUP.to_string(),
            priority: Priority::Default,
            payload: json!({ "granularity": "day", "period": period }),
            dedupe_key: format!("{USAGE_ROLLUP}:day:{period}"),
            not_before: now,
        })
        .await?;
    info!(period = %period, "enqueued day usage rollup");
    Ok(())
}

async fn enqueue_alert_eval(dispatcher: &TaskDispatcher, now: chrono::DateTime<Utc>) -> Result<(), crate::db::pool::DbError> {
    let period = now.format("%Y-%m-%dT%H:%M").to_string();
    dispatcher
        .enqueue(NewTask {
            task_type: ALERT_EVAL.to_string(),
            priority: Priority::Critical,
            payload: json!({ "window_minutes": 5 }),
            dedupe_key: format!("{ALERT_EVAL}:{period}"),
            not_before: now,
        })
        .await?;
    Ok(())
}

async fn enqueue_billing_rollup(dispatcher: &TaskDispatcher, now: chrono::DateTime<Utc>) -> Result<(), crate::db::pool::DbError> {
    let period = now.format("%Y-%m-%d").to_string();
    dispatcher
        .enqueue(NewTask {
            task_type: BILLING_ROLLUP.to_string(),
            priority: Priority::Default,
            payload: json!({ "date": period }),
            dedupe_key: format!("{BILLING_ROLLUP}:{period}"),
            not_before: now,
        })
        .await?;
    Ok(())
}

async fn enqueue_retention_sweep(dispatcher: &TaskDispatcher, now: chrono::DateTime<Utc>) -> Result<(), crate::db::pool::DbError> {
    let period = now.format("%Y-%m-%d").to_string();
    dispatcher
        .enqueue(NewTask {
            task_type: RETENTION_SWEEP.to_string(),
            priority: Priority::Low,
            payload: json!({ "date": period }),
            dedupe_key: format!("{RETENTION_SWEEP}:{period}"),
            not_before: now,
        })
        .await?;
    Ok(())
}

/// Credential cache reconciliation (spec §4.4): proactively sweeps
/// expired entries out of the in-process `CredentialCache` instead of
/// leaving them for the next `get` to evict. Distinct from
/// `expire_unused`, which mutates credential status in Postgres rather
/// than the cache.
async fn enqueue_cache_reconcile(dispatcher: &TaskDispatcher, now: chrono::DateTime<Utc>) -> Result<(), crate::db::pool::DbError> {
    let period = now.format("%Y-%m-%dT%H:%M").to_string();
    dispatcher
        .enqueue(NewTask {
            task_type: CACHE_RECONCILE.to_string(),
            priority: Priority::Low,
            payload: json!({}),
            dedupe_key: format!("{CACHE_RECONCILE}:{period}"),
            not_before: now,
        })
        .await?;
    Ok(())
}

/// `ExpireUnused` (spec §4.2 C5): marks credentials unused past the
/// retention window as `expired`. Runs once a day, offset from the
/// midnight billing/retention cluster so it doesn't compete with them.
async fn enqueue_expire_unused(dispatcher: &TaskDispatcher, now: chrono::DateTime<Utc>) -> Result<(), crate::db::pool::DbError> {
    let period = now.format("%Y-%m-%d").to_string();
    dispatcher
        .enqueue(NewTask {
            task_type: EXPIRE_UNUSED.to_string(),
            priority: Priority::Low,
            payload: json!({ "date": period }),
            dedupe_key: format!("{EXPIRE_UNUSED}:{period}"),
            not_before: now,
        })
        .await?;
    Ok(())
}
