use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config_provider::ConfigProvider;
use crate::domain::job::JobState;
use crate::domain::CrawlResult;
use crate::engine::StateMachine;
use crate::error::{CoreError, CoreResult};
use crate::ports::cache::keys as cache_keys;
use crate::ports::persistence::{AdvanceOutcome, LeaseOutcome};
use crate::ports::{CachePort, PersistencePort, QueuePort};

/// A single leased job as returned from `pull`.
#[derive(Debug, Clone, Serialize)]
pub struct LeasedJobView {
    pub job_id: Uuid,
    pub url: String,
    pub priority: i16,
    pub max_retries: i32,
    pub timeout_seconds: i64,
    pub retry_count: i32,
    pub locked_until: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullResponse {
    pub jobs: Vec<LeasedJobView>,
    pub count: usize,
    pub skipped: usize,
}

/// Success-branch input to `submit`.
#[derive(Debug, Clone)]
pub struct SubmitSuccess {
    pub price: rust_decimal::Decimal,
    pub currency: String,
    pub title: Option<String>,
    pub in_stock: bool,
    pub parsed_data: Option<serde_json::Value>,
    pub raw_html: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Done {
        result_id: Uuid,
        job_id: Uuid,
        price: rust_decimal::Decimal,
        currency: String,
        policy_next_run: Option<chrono::DateTime<Utc>>,
    },
    Retried {
        job_id: Uuid,
        retry_count: i32,
        max_retries: i32,
    },
    Exhausted {
        job_id: Uuid,
        retry_count: i32,
        max_retries: i32,
        error: Option<String>,
    },
}

/// Implements the pull/submit protocol, integrating the state machine and
/// the cache port.
pub struct CoordinationService<P: PersistencePort, C: CachePort, Q: QueuePort> {
    persistence: Arc<P>,
    cache: Arc<C>,
    queue: Arc<Q>,
    config: Arc<ConfigProvider>,
    hard_cap_jobs_per_pull: i64,
}

impl<P: PersistencePort, C: CachePort, Q: QueuePort> CoordinationService<P, C, Q> {
    pub fn new(
        persistence: Arc<P>,
        cache: Arc<C>,
        queue: Arc<Q>,
        config: Arc<ConfigProvider>,
        hard_cap_jobs_per_pull: i64,
    ) -> Self {
        Self {
            persistence,
            cache,
            queue,
            config,
            hard_cap_jobs_per_pull,
        }
    }

    /// Leases up to `max_jobs` pending jobs for `bot_id`.
    pub async fn pull(
        &self,
        bot_id: &str,
        max_jobs: i64,
        domain_filter: Option<&str>,
    ) -> CoreResult<PullResponse> {
        if bot_id.trim().is_empty() {
            return Err(CoreError::Validation("bot_id must not be empty".into()));
        }
        let max_jobs = max_jobs.clamp(1, self.hard_cap_jobs_per_pull);

        let cache_cfg = self.config.current_cache().await;
        let cache_key = match domain_filter {
            Some(d) if !d.is_empty() => cache_keys::pending_domain(d),
            _ => cache_keys::PENDING_ALL.to_string(),
        };

        let candidate_ids: Vec<Uuid> = if cache_cfg.enabled && cache_cfg.pending_jobs_enabled {
            match self.cache.get(&cache_key).await {
                Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
                _ => {
                    let jobs = self
                        .persistence
                        .find_pending_jobs(domain_filter, max_jobs.max(100))
                        .await?;
                    let ids: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
                    if let Ok(raw) = serde_json::to_string(&ids) {
                        self.cache
                            .set(&cache_key, &raw, cache_cfg.pending_jobs_ttl())
                            .await
                            .ok();
                    }
                    ids
                }
            }
        } else {
            let jobs = self
                .persistence
                .find_pending_jobs(domain_filter, max_jobs.max(100))
                .await?;
            jobs.into_iter().map(|j| j.id).collect()
        };

        let now = Utc::now();
        let mut leased = Vec::new();
        let mut skipped = 0usize;

        for job_id in candidate_ids {
            if leased.len() as i64 >= max_jobs {
                break;
            }
            let Some(existing) = self.persistence.get_job(job_id).await? else {
                continue;
            };
            let ttl = existing.lock_ttl_seconds;
            match self.persistence.try_lease_job(job_id, bot_id, now, ttl).await? {
                LeaseOutcome::Leased(job) => {
                    leased.push(LeasedJobView {
                        job_id: job.id,
                        url: self.resolve_url(&job.product_url_hash).await,
                        priority: job.priority,
                        max_retries: job.max_retries,
                        timeout_seconds: job.lock_ttl_seconds,
                        retry_count: job.retry_count,
                        locked_until: job.locked_at.unwrap_or(now)
                            + chrono::Duration::seconds(job.lock_ttl_seconds),
                    });
                }
                LeaseOutcome::AlreadyLeased => {
                    skipped += 1;
                }
            }
        }

        if !leased.is_empty() || skipped > 0 {
            self.cache.delete_pattern(cache_keys::pending_prefix()).await.ok();
        }

        let count = leased.len();
        Ok(PullResponse { jobs: leased, count, skipped })
    }

    async fn resolve_url(&self, url_hash: &str) -> String {
        match self.persistence.get_product_url(url_hash).await {
            Ok(Some(u)) => u.normalized_url,
            _ => url_hash.to_string(),
        }
    }

    /// Reports the outcome of a leased job back into the state machine.
    pub async fn submit(
        &self,
        bot_id: &str,
        job_id: Uuid,
        success: bool,
        success_data: Option<SubmitSuccess>,
        error_msg: Option<String>,
    ) -> CoreResult<SubmitOutcome> {
        if let Some(msg) = &error_msg {
            if msg.len() > crate::domain::result::MAX_ERROR_MSG_LEN {
                return Err(CoreError::Validation("error_msg too long".into()));
            }
        }
        if success {
            let data = success_data
                .as_ref()
                .ok_or_else(|| CoreError::Validation("price/currency required on success".into()))?;
            if data.price < rust_decimal::Decimal::ZERO {
                return Err(CoreError::Validation("price must be >= 0".into()));
            }
            if !crate::domain::result::is_valid_currency(&data.currency) {
                return Err(CoreError::Validation(
                    "currency must be exactly three uppercase letters".into(),
                ));
            }
        }

        let job = self
            .persistence
            .get_job(job_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("job {job_id}")))?;

        let now = Utc::now();
        StateMachine::check_submit_preconditions(&job, bot_id, now)?;

        if success {
            self.submit_success(job_id, &job, success_data.unwrap(), now).await
        } else {
            self.submit_failure(job_id, &job, error_msg, now).await
        }
    }

    async fn submit_success(
        &self,
        job_id: Uuid,
        job: &crate::domain::CrawlJob,
        data: SubmitSuccess,
        now: chrono::DateTime<Utc>,
    ) -> CoreResult<SubmitOutcome> {
        let patch = StateMachine::success_patch();
        let outcome = self
            .persistence
            .advance_job_state(job_id, JobState::Locked, JobState::Done, patch)
            .await?;
        let AdvanceOutcome::Ok(_) = outcome else {
            return Err(CoreError::LeaseExpired);
        };

        let result = CrawlResult::builder()
            .job_id(job_id)
            .url_hash(job.product_url_hash.clone())
            .price(data.price)
            .currency(data.currency.clone())
            .title(data.title)
            .in_stock(data.in_stock)
            .parsed_data(data.parsed_data)
            .raw_html(data.raw_html)
            .crawled_at(now)
            .build();
        self.persistence.create_result(&result).await?;
        self.queue.enqueue(result.id).await?;

        self.cache.delete(&cache_keys::job(&job_id.to_string())).await.ok();
        self.cache.delete_pattern(cache_keys::pending_prefix()).await.ok();

        let policy_next_run = if let Some(mut policy) = self.persistence.get_policy(job.policy_id).await? {
            policy.on_success(now);
            self.persistence.update_policy_schedule(&policy).await?;
            policy.next_run_at
        } else {
            None
        };

        Ok(SubmitOutcome::Done {
            result_id: result.id,
            job_id,
            price: data.price,
            currency: data.currency,
            policy_next_run,
        })
    }

    async fn submit_failure(
        &self,
        job_id: Uuid,
        job: &crate::domain::CrawlJob,
        error_msg: Option<String>,
        now: chrono::DateTime<Utc>,
    ) -> CoreResult<SubmitOutcome> {
        if StateMachine::should_retry(job) {
            let patch = StateMachine::retry_patch(job, error_msg);
            let outcome = self
                .persistence
                .advance_job_state(job_id, JobState::Locked, JobState::Pending, patch)
                .await?;
            let AdvanceOutcome::Ok(updated) = outcome else {
                return Err(CoreError::LeaseExpired);
            };
            self.cache.delete_pattern(cache_keys::pending_prefix()).await.ok();
            Ok(SubmitOutcome::Retried {
                job_id,
                retry_count: updated.retry_count,
                max_retries: updated.max_retries,
            })
        } else {
            let patch = StateMachine::failure_patch(error_msg.clone());
            let outcome = self
                .persistence
                .advance_job_state(job_id, JobState::Locked, JobState::Failed, patch)
                .await?;
            let AdvanceOutcome::Ok(updated) = outcome else {
                return Err(CoreError::LeaseExpired);
            };

            if let Some(mut policy) = self.persistence.get_policy(job.policy_id).await? {
                policy.on_failure(now);
                self.persistence.update_policy_schedule(&policy).await?;
            }

            Ok(SubmitOutcome::Exhausted {
                job_id,
                retry_count: updated.retry_count,
                max_retries: updated.max_retries,
                error: error_msg,
            })
        }
    }
}
