//! Viva
//!
//! Distributed API-key-aware rate-limiting and usage-accounting service.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;

mod aggregators;
mod api;
mod config;
mod counter;
mod credentials;
mod db;
mod dispatcher;
mod error;
mod ratelimit;
mod recorder;

use crate::aggregators::alerts::AlertEvaluator;
use crate::aggregators::billing::BillingRollup;
use crate::aggregators::retention::RetentionSweep;
use crate::aggregators::usage_rollup::UsageRollup;
use crate::aggregators::{AlertSink, TracingAlertSink};
use crate::api::middleware::ApiMiddleware;
use crate::config::{CounterBackend, Settings};
use crate::counter::{CounterStore, MemoryCounterStore, RedisCounterStore};
use crate::credentials::CredentialService;
use crate::db::{AlertRepository, BillingRepository, CredentialRepository, DbPool, TaskRepository, UsageRepository, ViolationRepository};
use crate::dispatcher::TaskDispatcher;
use crate::ratelimit::RateLimitEngine;
use crate::recorder::UsageRecorder;

/// Application state shared across all handlers and background workers.
pub struct AppState {
    pub settings: Settings,
    pub db_pool: DbPool,
    pub credential_service: Arc<CredentialService>,
    pub credential_repo: Arc<CredentialRepository>,
    pub engine: Arc<RateLimitEngine<Arc<dyn CounterStore>>>,
    pub recorder: Arc<UsageRecorder>,
    pub usage_repo: Arc<UsageRepository>,
    pub violation_repo: Arc<ViolationRepository>,
    pub billing_repo: Arc<BillingRepository>,
    pub alert_repo: Arc<AlertRepository>,
    pub dispatcher: Arc<TaskDispatcher>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("viva=info".parse().unwrap())
                .add_directive("actix_web=info".parse().unwrap()),
        )
        .json()
        .init();

    let settings = Settings::load().expect("failed to load configuration");
    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);

    info!(version = env!("CARGO_PKG_VERSION"), addr = %bind_addr, "starting viva");

    let db_pool = DbPool::new(&settings.database.url).expect("failed to create database pool");
    db_pool
        .test_connection()
        .await
        .expect("database connection test failed");

    let credential_repo_for_service = CredentialRepository::new(db_pool.clone(), settings.credential_prefix.clone());
    let credential_repo = Arc::new(CredentialRepository::new(db_pool.clone(), settings.credential_prefix.clone()));
    let usage_repo = Arc::new(UsageRepository::new(db_pool.clone()));
    let violation_repo = Arc::new(ViolationRepository::new(db_pool.clone()));
    let billing_repo = Arc::new(BillingRepository::new(db_pool.clone()));
    let alert_repo = Arc::new(AlertRepository::new(db_pool.clone()));
    let task_repo = Arc::new(TaskRepository::new(db_pool.clone()));

    let credential_service = Arc::new(CredentialService::new(
        credential_repo_for_service,
        settings.cache.credential_ttl_ms,
        settings.tiers.clone(),
    ));

    let counter_store: Arc<dyn CounterStore> = build_counter_store(&settings).await;
    let engine = Arc::new(RateLimitEngine::new(
        counter_store,
        settings.counter.key_prefix.clone(),
        settings.counter.fail_policy,
    ));

    let recorder = Arc::new(UsageRecorder::new(
        usage_repo.clone(),
        credential_repo.clone(),
        settings.recorder.buffer_size,
        settings.recorder.batch_size,
        Duration::from_millis(settings.recorder.flush_interval_ms),
        settings.recorder.max_retries,
        settings.recorder.spill_path.clone(),
    ));
    let flusher_handle = recorder.clone().spawn_flusher();

    let dispatcher = Arc::new(TaskDispatcher::new(
        task_repo.clone(),
        &settings.dispatcher.queue_weights,
        settings.dispatcher.max_attempts,
    ));

    register_aggregators(
        &dispatcher,
        credential_repo.clone(),
        usage_repo.clone(),
        violation_repo.clone(),
        billing_repo.clone(),
        alert_repo.clone(),
        credential_service.clone(),
        settings.tiers.clone(),
        settings.retention_days,
    );

    let worker_handles = dispatcher.clone().spawn_workers(settings.dispatcher.concurrency);
    let scheduler_handle = tokio::spawn(dispatcher::scheduler::run(dispatcher.clone()));

    let app_state = web::Data::new(AppState {
        settings: settings.clone(),
        db_pool: db_pool.clone(),
        credential_service,
        credential_repo,
        engine,
        recorder: recorder.clone(),
        usage_repo,
        violation_repo,
        billing_repo,
        alert_repo,
        dispatcher,
    });

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(ApiMiddleware::new())
            .wrap(TracingLogger::default())
            .wrap(middleware::Compress::default())
            .wrap(
                middleware::DefaultHeaders::new()
                    .add(("X-Service", "viva"))
                    .add(("X-Version", env!("CARGO_PKG_VERSION"))),
            )
            .configure(api::configure_routes)
    })
    .workers(settings.server.workers.unwrap_or_else(|| num_cpus::get() * 2))
    .bind(&bind_addr)?
    .run();

    let result = server.await;

    info!("shutting down: flushing pending usage records");
    scheduler_handle.abort();
    for handle in worker_handles {
        handle.abort();
    }
    flusher_handle.abort();
    recorder.shutdown().await;

    result
}

async fn build_counter_store(settings: &Settings) -> Arc<dyn CounterStore> {
    match settings.counter.backend {
        CounterBackend::Memory => Arc::new(MemoryCounterStore::new()),
        CounterBackend::Shared => {
            let url = settings
                .counter
                .redis_url
                .as_deref()
                .expect("counter.redis_url is required when counter.backend = shared");
            match RedisCounterStore::connect(url).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!(error = %e, "failed to connect to redis counter backend, falling back to in-process memory store");
                    Arc::new(MemoryCounterStore::new())
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn register_aggregators(
    dispatcher: &Arc<TaskDispatcher>,
    credential_repo: Arc<CredentialRepository>,
    usage_repo: Arc<UsageRepository>,
    violation_repo: Arc<ViolationRepository>,
    billing_repo: Arc<BillingRepository>,
    alert_repo: Arc<AlertRepository>,
    credential_service: Arc<CredentialService>,
    tiers: crate::config::TierSettings,
    retention_days: u32,
) {
    let usage_rollup = Arc::new(UsageRollup::new(usage_repo.clone()));
    dispatcher.register("usage_rollup", Arc::new(move |payload| {
        let usage_rollup = usage_rollup.clone();
        Box::pin(async move { usage_rollup.run(payload).await })
    }));

    let sink: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);
    let alert_evaluator = Arc::new(AlertEvaluator::new(
        credential_repo.clone(),
        usage_repo.clone(),
        violation_repo.clone(),
        alert_repo.clone(),
        sink,
    ));
    dispatcher.register("alert_eval", Arc::new(move |payload| {
        let alert_evaluator = alert_evaluator.clone();
        Box::pin(async move { alert_evaluator.run(payload).await })
    }));

    let billing_rollup = Arc::new(BillingRollup::new(credential_repo.clone(), usage_repo.clone(), billing_repo, tiers));
    dispatcher.register("billing_rollup", Arc::new(move |payload| {
        let billing_rollup = billing_rollup.clone();
        Box::pin(async move { billing_rollup.run(payload).await })
    }));

    let retention_sweep = Arc::new(RetentionSweep::new(usage_repo, violation_repo, retention_days));
    dispatcher.register("retention_sweep", Arc::new(move |payload| {
        let retention_sweep = retention_sweep.clone();
        Box::pin(async move { retention_sweep.run(payload).await })
    }));

    let credential_service_for_reconcile = credential_service.clone();
    dispatcher.register("cache_reconcile", Arc::new(move |_payload| {
        let credential_service = credential_service_for_reconcile.clone();
        Box::pin(async move {
            let evicted = credential_service.reconcile_cache();
            tracing::debug!(evicted, "credential cache reconciled");
            Ok(())
        })
    }));

    dispatcher.register("expire_unused", Arc::new(move |_payload| {
        let credential_service = credential_service.clone();
        Box::pin(async move {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(90);
            credential_service
                .expire_unused(cutoff)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }));
}
