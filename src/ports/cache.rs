use async_trait::async_trait;

use crate::error::CoreResult;

/// A key-value cache with TTL and prefix-delete. Advisory only: every
/// caller MUST fall back to the persistence port on miss, connection
/// error, or deserialization failure.
#[async_trait]
pub trait CachePort: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: i64) -> CoreResult<()>;

    async fn delete(&self, key: &str) -> CoreResult<()>;

    /// Deletes every key under `prefix` (used to invalidate the
    /// `crawl:jobs:pending:*` family in one call).
    async fn delete_pattern(&self, prefix: &str) -> CoreResult<()>;

    async fn ping(&self) -> CoreResult<()>;
}

/// Cache key namespace.
pub mod keys {
    pub const PENDING_ALL: &str = "crawl:jobs:pending:all";

    pub fn pending_domain(domain_name: &str) -> String {
        format!("crawl:jobs:pending:domain:{domain_name}")
    }

    pub fn pending_prefix() -> &'static str {
        "crawl:jobs:pending:"
    }

    pub fn job(job_id: &str) -> String {
        format!("crawl:job:{job_id}")
    }

    pub fn url(url_hash: &str) -> String {
        format!("crawl:url:{url_hash}")
    }
}
