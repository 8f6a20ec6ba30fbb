//! Task Dispatcher (C7) — durable priority queue with a weighted worker
//! pool and idempotent handlers. Rather than tracking jobs in an
//! in-memory `RwLock<HashMap>`, this dispatcher persists tasks in
//! Postgres and adds retry/dead-letter semantics on top.

pub mod scheduler;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use tracing::{error, info, instrument, warn};

use crate::config::QueueWeights;
use crate::db::tasks::{DbTask, NewTask, Priority, TaskRepository};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type TaskHandler = Arc<dyn Fn(Json) -> HandlerFuture + Send + Sync>;

pub struct TaskDispatcher {
    repo: Arc<TaskRepository>,
    handlers: std::sync::RwLock<HashMap<String, TaskHandler>>,
    schedule: Vec<Priority>,
    cursor: AtomicUsize,
    max_attempts: i32,
    base_delay: Duration,
    max_delay: Duration,
}

impl TaskDispatcher {
    pub fn new(repo: Arc<TaskRepository>, weights: &QueueWeights, max_attempts: u32) -> Self {
        let schedule = build_schedule(weights);
        Self {
            repo,
            handlers: std::sync::RwLock::new(HashMap::new()),
            schedule,
            cursor: AtomicUsize::new(0),
            max_attempts: max_attempts as i32,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }

    /// Registers an idempotent handler for `task_type`. Handlers MUST be
    /// safe to re-run for the same `(task_type, credential_id, period)`
    /// dedupe key, since exactly-once delivery is not provided.
    pub fn register(&self, task_type: impl Into<String>, handler: TaskHandler) {
        self.handlers.write().unwrap().insert(task_type.into(), handler);
    }

    pub async fn enqueue(&self, task: NewTask) -> Result<Option<uuid::Uuid>, crate::db::pool::DbError> {
        self.repo.enqueue(task).await
    }

    /// Spawns `concurrency` workers, each cycling through the weighted
    /// priority schedule and claiming one ready task at a time.
    pub fn spawn_workers(self: Arc<Self>, concurrency: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..concurrency.max(1))
            .map(|worker_id| {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.worker_loop(worker_id).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize) {
        loop {
            match self.claim_and_run().await {
                Ok(true) => continue,
                Ok(false) => tokio::time::sleep(Duration::from_millis(250)).await,
                Err(e) => {
                    error!(worker_id, error = %e, "dispatcher worker claim failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Returns `Ok(true)` if a task was claimed and executed (regardless
    /// of success), `Ok(false)` if every queue was empty this tick.
    async fn claim_and_run(&self) -> Result<bool, crate::db::pool::DbError> {
        let priority = self.next_priority();
        let Some(task) = self.repo.claim_next(priority).await? else {
            return Ok(false);
        };
        self.run_task(task).await;
        Ok(true)
    }

    fn next_priority(&self) -> Priority {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.schedule.len().max(1);
        self.schedule.get(i).copied().unwrap_or(Priority::Default)
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    async fn run_task(&self, task: DbTask) {
        let handler = self.handlers.read().unwrap().get(&task.task_type).cloned();

        let Some(handler) = handler else {
            warn!(task_type = %task.task_type, "no handler registered; dead-lettering");
            let _ = self
                .repo
                .retry_or_dead_letter(task.id, "no handler registered", self.base_delay, self.max_delay, 0)
                .await;
            return;
        };

        match handler(task.payload.clone()).await {
            Ok(()) => {
                if let Err(e) = self.repo.complete(task.id).await {
                    error!(error = %e, "failed to mark task completed");
                }
            }
            Err(err) => {
                warn!(error = %err, attempts = task.attempts, "task handler failed");
                match self
                    .repo
                    .retry_or_dead_letter(task.id, &err, self.base_delay, self.max_delay, self.max_attempts)
                    .await
                {
                    Ok(crate::db::tasks::TaskStatus::DeadLetter) => {
                        error!(task_id = %task.id, "task moved to dead letter after exhausting retries");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "failed to schedule task retry"),
                }
            }
        }
    }
}

fn build_schedule(weights: &QueueWeights) -> Vec<Priority> {
    let mut schedule = Vec::new();
    schedule.extend(std::iter::repeat(Priority::Critical).take(weights.critical as usize));
    schedule.extend(std::iter::repeat(Priority::Default).take(weights.default as usize));
    schedule.extend(std::iter::repeat(Priority::Low).take(weights.low as usize));
    if schedule.is_empty() {
        schedule.push(Priority::Default);
    }
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_honors_weight_ratio() {
        let weights = QueueWeights { critical: 6, default: 3, low: 1 };
        let schedule = build_schedule(&weights);
        assert_eq!(schedule.len(), 10);
        assert_eq!(schedule.iter().filter(|p| **p == Priority::Critical).count(), 6);
        assert_eq!(schedule.iter().filter(|p| **p == Priority::Default).count(), 3);
        assert_eq!(schedule.iter().filter(|p| **p == Priority::Low).count(), 1);
    }
}
