//! Usage Recorder (C6) — bounded ring buffer + background flusher
//! (spec §4.3). Generalized from the teacher's fire-and-forget
//! `tokio::spawn` usage logging in `api/middleware/service.rs` into an
//! owned buffering component with batched writes, and from the
//! exponential-backoff retry shape of `providers::http_client::
//! RateLimitedClient::execute_with_retry` (teacher), here applied to
//! flush retries instead of outbound HTTP calls.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::credentials::CredentialRepository;
use crate::db::usage::{UsageRecord, UsageRepository};

/// Process-scoped ring buffer. `record` never blocks the hot path: a full
/// buffer drops its oldest entry (spec §4.3 `drop_oldest`).
struct RingBuffer {
    entries: VecDeque<UsageRecord>,
    capacity: usize,
    dropped: AtomicU64,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&mut self, record: UsageRecord) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.entries.push_back(record);
    }

    fn drain_up_to(&mut self, n: usize) -> Vec<UsageRecord> {
        let take = n.min(self.entries.len());
        self.entries.drain(..take).collect()
    }
}

pub struct UsageRecorder {
    buffer: Mutex<RingBuffer>,
    usage_repo: Arc<UsageRepository>,
    credential_repo: Arc<CredentialRepository>,
    batch_size: usize,
    flush_interval: Duration,
    max_retries: u32,
    spill_path: Option<PathBuf>,
    notify: Notify,
    flush_failures: AtomicU64,
}

impl UsageRecorder {
    pub fn new(
        usage_repo: Arc<UsageRepository>,
        credential_repo: Arc<CredentialRepository>,
        buffer_size: usize,
        batch_size: usize,
        flush_interval: Duration,
        max_retries: u32,
        spill_path: Option<PathBuf>,
    ) -> Self {
        Self {
            buffer: Mutex::new(RingBuffer::new(buffer_size)),
            usage_repo,
            credential_repo,
            batch_size,
            flush_interval,
            max_retries,
            spill_path,
            notify: Notify::new(),
            flush_failures: AtomicU64::new(0),
        }
    }

    /// `Record(partial_record)` — enqueue and return immediately.
    pub fn record(&self, record: UsageRecord) {
        self.buffer.lock().push(record);
    }

    pub fn dropped_count(&self) -> u64 {
        self.buffer.lock().dropped.load(Ordering::Relaxed)
    }

    pub fn flush_failure_count(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    /// Spawns the background flusher. Returns a handle the caller can
    /// `abort()` on shutdown; `shutdown()` below performs one last
    /// synchronous drain before that.
    pub fn spawn_flusher(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.flush_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.notify.notified() => {}
                }
                self.flush_once().await;
            }
        })
    }

    /// `shutdown(deadline)` — flush pending work before the process
    /// exits (spec §5 "explicit init/shutdown that must flush pending
    /// work").
    pub async fn shutdown(&self) {
        self.flush_once().await;
    }

    async fn flush_once(&self) {
        let batch = {
            let mut buffer = self.buffer.lock();
            buffer.drain_up_to(self.batch_size)
        };
        if batch.is_empty() {
            return;
        }

        match self.flush_with_retry(&batch).await {
            Ok(()) => self.coalesce_credential_touches(&batch).await,
            Err(e) => {
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, count = batch.len(), "usage batch flush exhausted retries");
                self.spill_or_drop(&batch);
            }
        }
    }

    async fn flush_with_retry(&self, batch: &[UsageRecord]) -> Result<(), crate::db::pool::DbError> {
        let mut backoff = Duration::from_millis(200);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let jitter_ms = rand::thread_rng().gen_range(0..100);
                tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }

            match self.usage_repo.insert_batch(batch).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "usage batch flush attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.expect("loop runs at least once"))
    }

    /// Single coalesced update per credential per flush batch (spec §4.3
    /// "side effects").
    async fn coalesce_credential_touches(&self, batch: &[UsageRecord]) {
        let mut counts: HashMap<Uuid, i64> = HashMap::new();
        for record in batch {
            *counts.entry(record.credential_id).or_insert(0) += 1;
        }

        for (credential_id, count) in counts {
            if let Err(e) = self.credential_repo.increment_usage(credential_id, count).await {
                warn!(%credential_id, error = %e, "failed to coalesce usage increment");
            }
            if let Err(e) = self.credential_repo.touch(credential_id).await {
                warn!(%credential_id, error = %e, "failed to touch credential last_used_at");
            }
        }
    }

    fn spill_or_drop(&self, batch: &[UsageRecord]) {
        let Some(path) = &self.spill_path else {
            warn!(count = batch.len(), "dropping usage batch: no spill path configured");
            return;
        };

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| {
                for record in batch {
                    writeln!(
                        file,
                        r#"{{"credential_id":"{}","endpoint":"{}","method":"{}","status_code":{},"timestamp":"{}"}}"#,
                        record.credential_id,
                        record.endpoint,
                        record.method,
                        record.status_code,
                        record.timestamp.to_rfc3339()
                    )?;
                }
                Ok(())
            });

        if let Err(e) = result {
            error!(error = %e, path = %path.display(), "failed to spill usage batch to disk");
        } else {
            info!(count = batch.len(), path = %path.display(), "spilled usage batch to disk");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(credential_id: Uuid) -> UsageRecord {
        UsageRecord {
            credential_id,
            endpoint: "/v1/decide".into(),
            method: "POST".into(),
            status_code: 200,
            response_time_ms: 5,
            request_size: 128,
            response_size: 64,
            client_ip: None,
            user_agent: None,
            country: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn ring_buffer_drops_oldest_when_full() {
        let mut buffer = RingBuffer::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        buffer.push(sample(a));
        buffer.push(sample(b));
        buffer.push(sample(c));

        assert_eq!(buffer.dropped.load(Ordering::Relaxed), 1);
        let drained = buffer.drain_up_to(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].credential_id, b);
        assert_eq!(drained[1].credential_id, c);
    }

    #[test]
    fn drain_up_to_caps_batch_size() {
        let mut buffer = RingBuffer::new(10);
        for _ in 0..5 {
            buffer.push(sample(Uuid::new_v4()));
        }
        let drained = buffer.drain_up_to(3);
        assert_eq!(drained.len(), 3);
        assert_eq!(buffer.entries.len(), 2);
    }
}
