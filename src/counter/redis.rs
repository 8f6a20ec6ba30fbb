//! Redis-backed `CounterStore` for multi-replica deployments.
//!
//! Implements the sliding-window-log algorithm as a single Lua script
//! so that purge, count, and conditional insert are atomic regardless
//! of how many service replicas call concurrently, using the familiar
//! `ZREMRANGEBYSCORE` / `ZCARD` / `ZADD` script pattern.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use super::{CounterError, CounterStore, WindowSample};

fn sliding_window_script() -> Script {
    Script::new(
        r#"
        local key = KEYS[1]
        local now_ms = tonumber(ARGV[1])
        local window_ms = tonumber(ARGV[2])
        local limit = tonumber(ARGV[3])
        local cost = tonumber(ARGV[4])
        local nonce = ARGV[5]
        local ttl_s = tonumber(ARGV[6])

        redis.call('ZREMRANGEBYSCORE', key, '-inf', now_ms - window_ms)
        local used = redis.call('ZCARD', key)

        if used + cost > limit then
            local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
            local oldest_score = oldest[2]
            return {0, used, oldest_score or false}
        end

        for i = 1, cost do
            redis.call('ZADD', key, now_ms, now_ms .. ':' .. nonce .. ':' .. i)
        end
        redis.call('EXPIRE', key, ttl_s)

        local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
        return {1, used + cost, oldest[2] or false}
        "#,
    )
}

/// Redis-backed sliding-window-log counter store, one connection manager
/// shared across the process (cheap to clone, multiplexes internally).
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
    nonce: AtomicU64,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CounterError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CounterError::Backend(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CounterError::Backend(format!("redis connect failed: {e}")))?;

        Ok(Self {
            conn,
            script: sliding_window_script(),
            nonce: AtomicU64::new(0),
        })
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn check_and_increment(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
        cost: u64,
    ) -> Result<WindowSample, CounterError> {
        let mut conn = self.conn.clone();
        let ttl_s = ((window_ms as f64) / 1000.0).ceil() as i64 + 10;
        let nonce = self.next_nonce();

        let result: Vec<redis::Value> = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(cost)
            .arg(nonce)
            .arg(ttl_s)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(error = %e, "redis counter script failed");
                CounterError::Backend(e.to_string())
            })?;

        parse_sample(result)
    }

    async fn peek(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<WindowSample, CounterError> {
        let mut conn = self.conn.clone();
        let cutoff = now_ms.saturating_sub(window_ms);

        let _: () = conn
            .zrembyscore(key, i64::MIN, cutoff)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;

        let used: u64 = conn
            .zcard(key)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;

        let oldest: Vec<(String, f64)> = conn
            .zrange_withscores(key, 0, 0)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;

        Ok(WindowSample {
            allowed: true,
            used,
            oldest_entry_ms: oldest.first().map(|(_, score)| *score as i64),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), CounterError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(|e| CounterError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        // ConnectionManager owns its own reconnect loop; nothing to flush.
    }
}

fn parse_sample(raw: Vec<redis::Value>) -> Result<WindowSample, CounterError> {
    if raw.len() < 3 {
        return Err(CounterError::Backend("malformed script response".into()));
    }

    let allowed = matches!(&raw[0], redis::Value::Int(1));
    let used = match &raw[1] {
        redis::Value::Int(n) => *n as u64,
        _ => 0,
    };
    let oldest_entry_ms = match &raw[2] {
        redis::Value::Data(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .map(|f| f as i64),
        redis::Value::Int(n) => Some(*n),
        _ => None,
    };

    Ok(WindowSample {
        allowed,
        used,
        oldest_entry_ms,
    })
}
