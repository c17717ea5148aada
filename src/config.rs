use anyhow::{Context, Result};

/// Process configuration, loaded once at startup.
///
/// Mirrors the composition-root pattern used throughout this codebase:
/// required variables fail fast with context, optional ones fall back to a
/// sane default.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub http_port: u16,

    /// How often the policy scheduler tick fires (default 60s).
    pub scheduler_interval_secs: u64,
    /// Max due policies materialized per scheduler pass (default 500).
    pub policy_batch: i64,
    /// Max expired leases swept per scheduler pass.
    pub lease_sweep_batch: i64,
    /// Max auto-record items consumed per pipeline batch (default 100).
    pub auto_record_batch: i64,
    /// Per-item retry cap before an id is moved to the failed set (default 3).
    pub auto_record_max_retries: i64,
    /// Call `retry_failed` once every N batches (default 10).
    pub auto_record_retry_every_n_batches: u64,

    pub hard_cap_jobs_per_pull: i64,
    pub default_max_jobs_per_pull: i64,
    pub default_cache_ttl_seconds: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: std::env::var("REDIS_URL").context("REDIS_URL must be set")?,
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            scheduler_interval_secs: std::env::var("SCHEDULER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            policy_batch: std::env::var("POLICY_BATCH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            lease_sweep_batch: std::env::var("LEASE_SWEEP_BATCH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            auto_record_batch: std::env::var("AUTO_RECORD_BATCH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            auto_record_max_retries: std::env::var("AUTO_RECORD_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            auto_record_retry_every_n_batches: std::env::var("AUTO_RECORD_RETRY_EVERY_N_BATCHES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            hard_cap_jobs_per_pull: 100,
            default_max_jobs_per_pull: 10,
            default_cache_ttl_seconds: 60,
        })
    }
}
