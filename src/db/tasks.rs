//! Durable task queue storage backing the Task Dispatcher (C7, spec
//! §4.4) — "a durable priority queue ... three queues: critical, default,
//! low", persisted in the same Postgres store as the rest of the core
//! entities rather than a separate broker, per SPEC_FULL.md §4.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use uuid::Uuid;

use super::pool::{DbError, DbPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Critical,
    Default,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::Default => "default",
            Priority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "critical" => Priority::Critical,
            "low" => Priority::Low,
            _ => Priority::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    DeadLetter,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::DeadLetter => "dead_letter",
        }
    }
}

/// `(type, payload, attempts, not_before, retention)` — spec §4.4's task
/// contract, with the `(task_type, credential_id, period)` idempotency
/// key carried explicitly as `dedupe_key`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub priority: Priority,
    pub payload: Json,
    pub dedupe_key: String,
    pub not_before: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DbTask {
    pub id: Uuid,
    pub task_type: String,
    pub priority: Priority,
    pub payload: Json,
    pub dedupe_key: String,
    pub attempts: i32,
    pub not_before: DateTime<Utc>,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct TaskRepository {
    pool: DbPool,
}

impl TaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// No-op if a task with the same `dedupe_key` is already pending or
    /// running — the handler-idempotency contract starts at enqueue time.
    pub async fn enqueue(&self, task: NewTask) -> Result<Option<Uuid>, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                INSERT INTO tasks (task_type, priority, payload, dedupe_key, attempts, not_before, status, created_at)
                VALUES ($1, $2, $3, $4, 0, $5, 'pending', NOW())
                ON CONFLICT (dedupe_key) WHERE status IN ('pending', 'running') DO NOTHING
                RETURNING id
                "#,
                &[
                    &task.task_type,
                    &task.priority.as_str(),
                    &task.payload,
                    &task.dedupe_key,
                    &task.not_before,
                ],
            )
            .await?;
        Ok(row.map(|r| r.get("id")))
    }

    /// Claims up to one ready task from `priority`, marking it `running`.
    pub async fn claim_next(&self, priority: Priority) -> Result<Option<DbTask>, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                UPDATE tasks SET status = 'running'
                WHERE id = (
                    SELECT id FROM tasks
                    WHERE priority = $1 AND status = 'pending' AND not_before <= NOW()
                    ORDER BY not_before ASC
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, task_type, priority, payload, dedupe_key, attempts, not_before, status, error_message, created_at
                "#,
                &[&priority.as_str()],
            )
            .await?;
        Ok(row.map(|r| Self::from_row(&r)))
    }

    pub async fn complete(&self, id: Uuid) -> Result<(), DbError> {
        let client = self.pool.get().await?;
        client
            .execute("UPDATE tasks SET status = 'completed' WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    /// Linear backoff retry (`n × base`, capped) or dead-letter once
    /// `max_attempts` is exhausted (spec §4.4).
    pub async fn retry_or_dead_letter(
        &self,
        id: Uuid,
        error: &str,
        base_delay: std::time::Duration,
        max_delay: std::time::Duration,
        max_attempts: i32,
    ) -> Result<TaskStatus, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT attempts FROM tasks WHERE id = $1", &[&id])
            .await?;
        let attempts: i32 = row.get("attempts");
        let next_attempts = attempts + 1;

        if next_attempts >= max_attempts {
            client
                .execute(
                    "UPDATE tasks SET status = 'dead_letter', attempts = $2, error_message = $3 WHERE id = $1",
                    &[&id, &next_attempts, &error],
                )
                .await?;
            return Ok(TaskStatus::DeadLetter);
        }

        let delay = (base_delay * next_attempts as u32).min(max_delay);
        let not_before = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        client
            .execute(
                "UPDATE tasks SET status = 'pending', attempts = $2, not_before = $3, error_message = $4 WHERE id = $1",
                &[&id, &next_attempts, &not_before, &error],
            )
            .await?;
        Ok(TaskStatus::Pending)
    }

    pub async fn dead_letter_tasks(&self) -> Result<Vec<DbTask>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, task_type, priority, payload, dedupe_key, attempts, not_before, status, error_message, created_at
                FROM tasks WHERE status = 'dead_letter' ORDER BY created_at DESC
                "#,
                &[],
            )
            .await?;
        Ok(rows.iter().map(Self::from_row).collect())
    }

    fn from_row(row: &tokio_postgres::Row) -> DbTask {
        let status: String = row.get("status");
        let priority: String = row.get("priority");
        DbTask {
            id: row.get("id"),
            task_type: row.get("task_type"),
            priority: Priority::from_str(&priority),
            payload: row.get("payload"),
            dedupe_key: row.get("dedupe_key"),
            attempts: row.get("attempts"),
            not_before: row.get("not_before"),
            status: match status.as_str() {
                "running" => TaskStatus::Running,
                "completed" => TaskStatus::Completed,
                "failed" => TaskStatus::Failed,
                "dead_letter" => TaskStatus::DeadLetter,
                _ => TaskStatus::Pending,
            },
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
        }
    }
}
