use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::ports::queue::{keys, QueuePort, QueueStats};

/// Redis-backed implementation of the queue port: a FIFO list, a
/// processing set, a failed set, and per-id failure counters.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl QueuePort for RedisQueue {
    async fn enqueue(&self, id: Uuid) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        // RPUSH so `dequeue`'s LPOP drains in FIFO order, and retried items
        // (also RPUSH'd) land at the tail, never the head.
        let _: () = conn.rpush(keys::MAIN_QUEUE, id.to_string()).await?;
        Ok(())
    }

    async fn dequeue(&self) -> CoreResult<Option<Uuid>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.lpop(keys::MAIN_QUEUE, None).await?;
        Ok(raw.and_then(|s| Uuid::parse_str(&s).ok()))
    }

    async fn mark_processing(&self, id: Uuid) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(keys::PROCESSING_SET, id.to_string()).await?;
        Ok(())
    }

    async fn unmark_processing(&self, id: Uuid) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(keys::PROCESSING_SET, id.to_string()).await?;
        Ok(())
    }

    async fn is_processing(&self, id: Uuid) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let present: bool = conn.sismember(keys::PROCESSING_SET, id.to_string()).await?;
        Ok(present)
    }

    async fn increment_failure(&self, id: Uuid) -> CoreResult<i64> {
        let mut conn = self.conn.clone();
        let key = keys::failure_counter(&id);
        let count: i64 = conn.incr(&key, 1).await?;
        let _: () = conn.expire(&key, keys::FAILURE_COUNTER_TTL_SECONDS).await?;
        Ok(count)
    }

    async fn clear_failure(&self, id: Uuid) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys::failure_counter(&id)).await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(keys::FAILED_SET, id.to_string()).await?;
        Ok(())
    }

    async fn retry_failed(&self, limit: i64) -> CoreResult<i64> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.spop_multiple(keys::FAILED_SET, limit as usize).await?;
        let moved = ids.len() as i64;
        for raw in ids {
            let _: () = conn.rpush(keys::MAIN_QUEUE, raw).await?;
        }
        Ok(moved)
    }

    async fn stats(&self) -> CoreResult<QueueStats> {
        let mut conn = self.conn.clone();
        let queue: i64 = conn.llen(keys::MAIN_QUEUE).await?;
        let processing: i64 = conn.scard(keys::PROCESSING_SET).await?;
        let failed: i64 = conn.scard(keys::FAILED_SET).await?;
        Ok(QueueStats { queue, processing, failed })
    }
}
