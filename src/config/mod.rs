//! Configuration for the rate-limiting and usage-accounting service.
//!
//! Layered load order (lowest to highest precedence), following the
//! teacher's `config` + `dotenvy` pattern:
//! 1. `config/default.toml`
//! 2. `config/local.toml` (gitignored, optional)
//! 3. environment variables prefixed `VIVA__`, double-underscore separated

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Top-level settings tree, deserialized in one shot.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub counter: CounterSettings,
    pub recorder: RecorderSettings,
    pub dispatcher: DispatcherSettings,
    pub cache: CacheSettings,
    pub retention_days: u32,
    pub credential_prefix: String,
    pub tiers: TierSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: Option<u32>,
}

/// `counter.backend: {memory, shared}` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterBackend {
    Memory,
    Shared,
}

/// `fail_policy: {closed, open}` (spec.md §6, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    Closed,
    Open,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterSettings {
    pub backend: CounterBackend,
    pub redis_url: Option<String>,
    pub fail_policy: FailPolicy,
    pub window_default_secs: u64,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderSettings {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub buffer_size: usize,
    pub spill_path: Option<PathBuf>,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueWeights {
    pub critical: u32,
    pub default: u32,
    pub low: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSettings {
    pub concurrency: usize,
    pub queue_weights: QueueWeights,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub credential_ttl_ms: u64,
}

/// `limit_default_by_tier` (spec.md §6) — per-tier defaults applied when a
/// credential does not carry an explicit override.
#[derive(Debug, Clone, Deserialize)]
pub struct TierDefault {
    pub rate_limit: u32,
    pub monthly_quota: u64,
    pub overage_rate_per_1000: f64,
    /// Flat monthly fee charged regardless of usage (Billing Rollup's
    /// `base_amount`, spec §4.5).
    pub base_price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TierSettings {
    pub free: TierDefault,
    pub basic: TierDefault,
    pub standard: TierDefault,
    pub pro: TierDefault,
    pub enterprise: TierDefault,
}

impl Settings {
    /// Load configuration from files and environment variables.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (prefixed `VIVA__`)
    /// 2. `config/local.toml` (gitignored)
    /// 3. `config/default.toml`
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("VIVA")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        let tier = |rate_limit, monthly_quota, overage_rate_per_1000, base_price| TierDefault {
            rate_limit,
            monthly_quota,
            overage_rate_per_1000,
            base_price,
        };

        Settings {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: None,
            },
            database: DatabaseSettings {
                url: String::new(),
                max_connections: Some(10),
            },
            counter: CounterSettings {
                backend: CounterBackend::Memory,
                redis_url: None,
                fail_policy: FailPolicy::Closed,
                window_default_secs: 60,
                key_prefix: "viva".to_string(),
            },
            recorder: RecorderSettings {
                batch_size: 200,
                flush_interval_ms: 1_000,
                buffer_size: 10_000,
                spill_path: None,
                max_retries: 5,
            },
            dispatcher: DispatcherSettings {
                concurrency: 4,
                queue_weights: QueueWeights {
                    critical: 6,
                    default: 3,
                    low: 1,
                },
                max_attempts: 5,
            },
            cache: CacheSettings {
                credential_ttl_ms: 60_000,
            },
            retention_days: 90,
            credential_prefix: "viva".to_string(),
            tiers: TierSettings {
                free: tier(60, 10_000, 0.0, 0.0),
                basic: tier(300, 100_000, 0.50, 29.0),
                standard: tier(1_200, 1_000_000, 0.35, 99.0),
                pro: tier(6_000, 10_000_000, 0.20, 299.0),
                enterprise: tier(30_000, 100_000_000, 0.10, 999.0),
            },
        }
    }
}
