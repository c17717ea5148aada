use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub queue: i64,
    pub processing: i64,
    pub failed: i64,
}

/// The async queue backing the auto-record pipeline: a FIFO main queue, a
/// processing set, a failed set, and per-id failure counters, all over a
/// single key-value service.
#[async_trait]
pub trait QueuePort: Send + Sync {
    async fn enqueue(&self, id: Uuid) -> CoreResult<()>;

    /// Pops the head of the FIFO queue, or `None` if empty.
    async fn dequeue(&self) -> CoreResult<Option<Uuid>>;

    async fn mark_processing(&self, id: Uuid) -> CoreResult<()>;

    async fn unmark_processing(&self, id: Uuid) -> CoreResult<()>;

    async fn is_processing(&self, id: Uuid) -> CoreResult<bool>;

    /// Increments and returns the per-id failure counter (TTL ~1h).
    async fn increment_failure(&self, id: Uuid) -> CoreResult<i64>;

    async fn clear_failure(&self, id: Uuid) -> CoreResult<()>;

    async fn mark_failed(&self, id: Uuid) -> CoreResult<()>;

    /// Pops up to `limit` ids from the failed set back onto the tail of
    /// the main queue, giving previously-failed items another chance.
    async fn retry_failed(&self, limit: i64) -> CoreResult<i64>;

    async fn stats(&self) -> CoreResult<QueueStats>;
}

/// Queue key namespace.
pub mod keys {
    pub const MAIN_QUEUE: &str = "crawl:auto_record:queue";
    pub const PROCESSING_SET: &str = "crawl:auto_record:processing";
    pub const FAILED_SET: &str = "crawl:auto_record:failed";

    pub fn failure_counter(id: &uuid::Uuid) -> String {
        format!("crawl:auto_record:failures:{id}")
    }

    /// TTL for the per-id failure counter.
    pub const FAILURE_COUNTER_TTL_SECONDS: i64 = 3600;
}
