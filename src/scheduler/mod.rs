use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config_provider::ConfigProvider;
use crate::domain::job::JobState;
use crate::domain::CrawlJob;
use crate::engine::StateMachine;
use crate::error::CoreResult;
use crate::ports::cache::keys as cache_keys;
use crate::ports::persistence::AdvanceOutcome;
use crate::ports::{CachePort, PersistencePort, QueuePort};
use crate::service::Service;

use crate::auto_record::AutoRecordConsumer;

/// A cooperative periodic task: materializes due policies into PENDING
/// jobs, sweeps expired leases, and drains one auto-record batch.
/// Sweeper, materializer, and queue drainer share one ticker rather than
/// three separately-scheduled tasks.
pub struct PolicyScheduler<P: PersistencePort, C: CachePort, Q: QueuePort> {
    persistence: Arc<P>,
    cache: Arc<C>,
    auto_record: Arc<AutoRecordConsumer<P, Q, C>>,
    config: Arc<ConfigProvider>,
    interval: Duration,
    policy_batch: i64,
    lease_sweep_batch: i64,
    candidate_page_size: i64,
}

impl<P: PersistencePort, C: CachePort, Q: QueuePort> PolicyScheduler<P, C, Q> {
    pub fn new(
        persistence: Arc<P>,
        cache: Arc<C>,
        auto_record: Arc<AutoRecordConsumer<P, Q, C>>,
        config: Arc<ConfigProvider>,
        interval_secs: u64,
        policy_batch: i64,
        lease_sweep_batch: i64,
    ) -> Self {
        Self {
            persistence,
            cache,
            auto_record,
            config,
            interval: Duration::from_secs(interval_secs),
            policy_batch,
            lease_sweep_batch,
            candidate_page_size: 500,
        }
    }

    /// Runs one full tick: config reload, lease sweep, policy
    /// materialization, auto-record drain. Idempotent under re-execution
    /// at the same wall-clock.
    pub async fn tick(&self) -> CoreResult<()> {
        let now = Utc::now();

        self.reload_config().await?;
        self.sweep_leases(now).await?;
        self.materialize_due_policies(now).await?;

        let batch_outcome = self.auto_record.run_batch().await?;
        tracing::info!(
            recorded = batch_outcome.recorded,
            duplicate = batch_outcome.duplicate,
            skipped = batch_outcome.skipped,
            failed = batch_outcome.failed,
            retried = batch_outcome.retried,
            "auto-record batch complete"
        );

        Ok(())
    }

    /// Re-reads the operator-editable auto-record and cache configs from
    /// persistence and swaps them into the shared `ConfigProvider`. A
    /// missing row (nothing written out-of-band yet) leaves the current
    /// in-memory value untouched.
    async fn reload_config(&self) -> CoreResult<()> {
        if let Some(cfg) = self.persistence.get_auto_record_config().await? {
            self.config.reload_auto_record(cfg).await;
        }
        if let Some(cfg) = self.persistence.get_cache_config().await? {
            self.config.reload_cache(cfg).await;
        }
        Ok(())
    }

    async fn sweep_leases(&self, now: chrono::DateTime<Utc>) -> CoreResult<()> {
        let expired_ids = self
            .persistence
            .sweep_expired_leases(now, self.lease_sweep_batch)
            .await?;

        if expired_ids.is_empty() {
            return Ok(());
        }

        for job_id in expired_ids {
            self.expire_then_requeue(job_id).await?;
        }

        self.cache.delete_pattern(cache_keys::pending_prefix()).await.ok();
        Ok(())
    }

    async fn expire_then_requeue(&self, job_id: Uuid) -> CoreResult<()> {
        let to_expired = self
            .persistence
            .advance_job_state(
                job_id,
                JobState::Locked,
                JobState::Expired,
                StateMachine::sweep_patch(),
            )
            .await?;

        if matches!(to_expired, AdvanceOutcome::Mismatch) {
            // Already moved on (e.g. a concurrent submit beat the sweep).
            return Ok(());
        }

        self.persistence
            .advance_job_state(
                job_id,
                JobState::Expired,
                JobState::Pending,
                StateMachine::sweep_patch(),
            )
            .await?;
        Ok(())
    }

    async fn materialize_due_policies(&self, now: chrono::DateTime<Utc>) -> CoreResult<()> {
        let due = self.persistence.list_due_policies(now, self.policy_batch).await?;

        for mut policy in due {
            let candidates = self
                .persistence
                .list_candidate_urls(policy.domain_id, self.candidate_page_size, None)
                .await?;

            for candidate in candidates {
                if !policy.matches_url(&candidate.normalized_url) {
                    continue;
                }
                if self
                    .persistence
                    .has_active_job(policy.id, &candidate.url_hash)
                    .await?
                {
                    continue;
                }

                let job = CrawlJob::builder()
                    .policy_id(policy.id)
                    .product_url_hash(candidate.url_hash)
                    .lock_ttl_seconds(policy.lock_ttl_seconds())
                    .max_retries(policy.max_retries)
                    .priority(policy.priority)
                    .build();
                self.persistence.insert_job(&job).await?;
            }

            // Advance regardless of how many jobs materialized, so partial
            // success cannot cause a tight loop.
            policy.advance_after_materialize(now);
            self.persistence.update_policy_schedule(&policy).await?;
        }

        self.cache.delete_pattern(cache_keys::pending_prefix()).await.ok();
        Ok(())
    }
}

#[async_trait]
impl<P: PersistencePort + 'static, C: CachePort + 'static, Q: QueuePort + 'static> Service
    for PolicyScheduler<P, C, Q>
{
    fn name(&self) -> &str {
        "policy-scheduler"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("policy scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AutoRecordConfig, CacheConfig, CrawlPolicy};
    use crate::ports::persistence::CandidateUrl;
    use crate::store::fixtures::{InMemoryCache, InMemoryPersistence, InMemoryQueue};

    fn scheduler(
        persistence: Arc<InMemoryPersistence>,
        cache: Arc<InMemoryCache>,
        queue: Arc<InMemoryQueue>,
    ) -> PolicyScheduler<InMemoryPersistence, InMemoryCache, InMemoryQueue> {
        let config = Arc::new(ConfigProvider::new(AutoRecordConfig::default(), CacheConfig::default()));
        let auto_record = Arc::new(AutoRecordConsumer::new(
            persistence.clone(),
            queue.clone(),
            cache.clone(),
            config.clone(),
            10,
            3,
            10,
        ));
        PolicyScheduler::new(persistence, cache, auto_record, config, 60, 10, 10)
    }

    fn policy(domain_id: Uuid, url_pattern: Option<&str>) -> CrawlPolicy {
        CrawlPolicy::builder()
            .domain_id(domain_id)
            .name("electronics-only")
            .url_pattern(url_pattern.map(str::to_string))
            .frequency_hours(24)
            .priority(5i16)
            .max_retries(3)
            .timeout_minutes(10)
            .build()
    }

    #[tokio::test]
    async fn materialize_skips_candidates_outside_the_url_pattern() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let cache = Arc::new(InMemoryCache::new());
        let queue = Arc::new(InMemoryQueue::new());

        let domain_id = Uuid::new_v4();
        let policy = policy(domain_id, Some(r"https://shop\.example/electronics/.*"));
        persistence.seed_policy(policy.clone()).await;

        persistence
            .seed_product_url(CandidateUrl {
                url_hash: "1".repeat(64),
                normalized_url: "https://shop.example/electronics/sku-1".to_string(),
                domain_id,
            })
            .await;
        persistence
            .seed_product_url(CandidateUrl {
                url_hash: "2".repeat(64),
                normalized_url: "https://shop.example/groceries/sku-2".to_string(),
                domain_id,
            })
            .await;

        let sched = scheduler(persistence.clone(), cache, queue);
        sched.materialize_due_policies(Utc::now()).await.unwrap();

        let jobs = persistence.all_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].product_url_hash, "1".repeat(64));
    }

    #[tokio::test]
    async fn materialize_does_not_duplicate_an_already_active_job() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let cache = Arc::new(InMemoryCache::new());
        let queue = Arc::new(InMemoryQueue::new());

        let domain_id = Uuid::new_v4();
        let policy = policy(domain_id, None);
        persistence.seed_policy(policy.clone()).await;

        let url_hash = "3".repeat(64);
        persistence
            .seed_product_url(CandidateUrl {
                url_hash: url_hash.clone(),
                normalized_url: "https://shop.example/electronics/sku-3".to_string(),
                domain_id,
            })
            .await;

        let existing = CrawlJob::builder()
            .policy_id(policy.id)
            .product_url_hash(url_hash.clone())
            .lock_ttl_seconds(policy.lock_ttl_seconds())
            .max_retries(policy.max_retries)
            .priority(policy.priority)
            .build();
        persistence.save_job(&existing).await.unwrap();

        let sched = scheduler(persistence.clone(), cache, queue);
        sched.materialize_due_policies(Utc::now()).await.unwrap();

        let jobs = persistence.all_jobs().await;
        assert_eq!(jobs.len(), 1, "has_active_job must have prevented a duplicate");
        assert_eq!(jobs[0].id, existing.id);
    }
}
