use serde::{Deserialize, Serialize};

/// At most one active instance. Re-read on restart and on an explicit
/// "reload" admin action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub enabled: bool,
    pub default_ttl_seconds: i64,
    pub pending_jobs_enabled: bool,
    pub pending_jobs_ttl_seconds: Option<i64>,
    pub job_details_enabled: bool,
    pub job_details_ttl_seconds: Option<i64>,
    pub product_url_details_enabled: bool,
    pub product_url_details_ttl_seconds: Option<i64>,
}

impl CacheConfig {
    pub fn pending_jobs_ttl(&self) -> i64 {
        self.pending_jobs_ttl_seconds.unwrap_or(self.default_ttl_seconds)
    }

    pub fn job_details_ttl(&self) -> i64 {
        self.job_details_ttl_seconds.unwrap_or(self.default_ttl_seconds)
    }

    pub fn product_url_details_ttl(&self) -> i64 {
        self.product_url_details_ttl_seconds
            .unwrap_or(self.default_ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
            enabled: true,
            default_ttl_seconds: 60,
            pending_jobs_enabled: true,
            pending_jobs_ttl_seconds: None,
            job_details_enabled: true,
            job_details_ttl_seconds: None,
            product_url_details_enabled: true,
            product_url_details_ttl_seconds: None,
        }
    }
}
