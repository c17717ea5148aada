use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::job::JobState;
use crate::domain::result::AutoRecordConfig;
use crate::domain::{BotConfig, CacheConfig, CrawlJob, CrawlPolicy, CrawlResult, HistoryRecordStatus};
use crate::error::{CoreError, CoreResult};
use crate::ports::cache::CachePort;
use crate::ports::persistence::{
    AdvanceOutcome, AppendOutcome, CandidateUrl, JobPatch, LeaseOutcome, PersistencePort,
};
use crate::ports::queue::{QueuePort, QueueStats};

/// In-memory doubles standing in for Postgres/Redis in unit and scenario
/// tests — the same role the teacher's `TestJobManager` plays for its job
/// manager tests. Kept as a plain (non-`cfg(test)`) module so both the
/// in-crate unit tests and the `tests/` integration suite can share one
/// implementation instead of drifting apart.
#[derive(Default)]
pub struct InMemoryPersistence {
    policies: Mutex<HashMap<Uuid, CrawlPolicy>>,
    jobs: Mutex<HashMap<Uuid, CrawlJob>>,
    results: Mutex<HashMap<Uuid, CrawlResult>>,
    bots: Mutex<HashMap<String, BotConfig>>,
    product_urls: Mutex<HashMap<String, CandidateUrl>>,
    /// last recorded (price, currency, in_stock) tuple per url_hash
    price_history: Mutex<HashMap<String, (Decimal, String, bool)>>,
    auto_record_config: Mutex<Option<AutoRecordConfig>>,
    cache_config: Mutex<Option<CacheConfig>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_policy(&self, policy: CrawlPolicy) {
        self.policies.lock().await.insert(policy.id, policy);
    }

    pub async fn seed_product_url(&self, url: CandidateUrl) {
        self.product_urls.lock().await.insert(url.url_hash.clone(), url);
    }

    pub async fn seed_bot(&self, bot: BotConfig) {
        self.bots.lock().await.insert(bot.bot_id.clone(), bot);
    }

    pub async fn seed_auto_record_config(&self, cfg: AutoRecordConfig) {
        *self.auto_record_config.lock().await = Some(cfg);
    }

    pub async fn seed_cache_config(&self, cfg: CacheConfig) {
        *self.cache_config.lock().await = Some(cfg);
    }

    pub async fn job(&self, id: Uuid) -> CrawlJob {
        self.jobs.lock().await.get(&id).cloned().expect("job must exist")
    }

    pub async fn policy(&self, id: Uuid) -> CrawlPolicy {
        self.policies.lock().await.get(&id).cloned().expect("policy must exist")
    }

    pub async fn all_jobs(&self) -> Vec<CrawlJob> {
        self.jobs.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl PersistencePort for InMemoryPersistence {
    async fn get_policy(&self, id: Uuid) -> CoreResult<Option<CrawlPolicy>> {
        Ok(self.policies.lock().await.get(&id).cloned())
    }

    async fn list_due_policies(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<CrawlPolicy>> {
        let mut due: Vec<CrawlPolicy> = self
            .policies
            .lock()
            .await
            .values()
            .filter(|p| p.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn save_policy(&self, policy: &CrawlPolicy) -> CoreResult<()> {
        self.policies.lock().await.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn update_policy_schedule(&self, policy: &CrawlPolicy) -> CoreResult<()> {
        self.policies.lock().await.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn list_candidate_urls(
        &self,
        domain_id: Uuid,
        limit: i64,
        _cursor: Option<String>,
    ) -> CoreResult<Vec<CandidateUrl>> {
        let mut urls: Vec<CandidateUrl> = self
            .product_urls
            .lock()
            .await
            .values()
            .filter(|u| u.domain_id == domain_id)
            .cloned()
            .collect();
        urls.sort_by(|a, b| a.normalized_url.cmp(&b.normalized_url));
        urls.truncate(limit as usize);
        Ok(urls)
    }

    async fn get_product_url(&self, url_hash: &str) -> CoreResult<Option<CandidateUrl>> {
        Ok(self.product_urls.lock().await.get(url_hash).cloned())
    }

    async fn find_pending_jobs(
        &self,
        domain_filter: Option<&str>,
        max: i64,
    ) -> CoreResult<Vec<CrawlJob>> {
        let urls = self.product_urls.lock().await;
        let mut jobs: Vec<CrawlJob> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.state == JobState::Pending)
            .filter(|j| match domain_filter {
                None => true,
                Some(f) => urls
                    .get(&j.product_url_hash)
                    .map(|u| u.normalized_url.contains(f))
                    .unwrap_or(false),
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        jobs.truncate(max as usize);
        Ok(jobs)
    }

    async fn get_job(&self, id: Uuid) -> CoreResult<Option<CrawlJob>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn save_job(&self, job: &CrawlJob) -> CoreResult<()> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn has_active_job(&self, policy_id: Uuid, product_url_hash: &str) -> CoreResult<bool> {
        Ok(self.jobs.lock().await.values().any(|j| {
            j.policy_id == policy_id && j.product_url_hash == product_url_hash && !j.state.is_terminal()
        }))
    }

    async fn insert_job(&self, job: &CrawlJob) -> CoreResult<()> {
        let mut jobs = self.jobs.lock().await;
        if jobs
            .values()
            .any(|j| j.policy_id == job.policy_id && j.product_url_hash == job.product_url_hash && !j.state.is_terminal())
        {
            return Err(CoreError::FatalStore("duplicate active job".into()));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn try_lease_job(
        &self,
        job_id: Uuid,
        bot_id: &str,
        now: DateTime<Utc>,
        ttl_seconds: i64,
    ) -> CoreResult<LeaseOutcome> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(LeaseOutcome::AlreadyLeased);
        };
        let eligible = job.state == JobState::Pending
            || job.state == JobState::Expired
            || (job.state == JobState::Locked && job.lease_expired(now));
        if !eligible {
            return Ok(LeaseOutcome::AlreadyLeased);
        }
        job.state = JobState::Locked;
        job.locked_by = Some(bot_id.to_string());
        job.locked_at = Some(now);
        job.lock_ttl_seconds = ttl_seconds;
        job.updated_at = now;
        Ok(LeaseOutcome::Leased(Box::new(job.clone())))
    }

    async fn advance_job_state(
        &self,
        job_id: Uuid,
        from_state: JobState,
        to_state: JobState,
        patch: JobPatch,
    ) -> CoreResult<AdvanceOutcome> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(AdvanceOutcome::Mismatch);
        };
        if job.state != from_state {
            return Ok(AdvanceOutcome::Mismatch);
        }
        job.state = to_state;
        if let Some(v) = patch.locked_by {
            job.locked_by = v;
        }
        if let Some(v) = patch.locked_at {
            job.locked_at = v;
        }
        if let Some(v) = patch.lock_ttl_seconds {
            job.lock_ttl_seconds = v;
        }
        if let Some(v) = patch.retry_count {
            job.retry_count = v;
        }
        if let Some(v) = patch.last_error {
            job.last_error = v;
        }
        job.updated_at = Utc::now();
        Ok(AdvanceOutcome::Ok(Box::new(job.clone())))
    }

    async fn sweep_expired_leases(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Uuid>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|j| j.state == JobState::Locked && j.lease_expired(now))
            .take(limit as usize)
            .map(|j| j.id)
            .collect())
    }

    async fn create_result(&self, result: &CrawlResult) -> CoreResult<()> {
        let mut results = self.results.lock().await;
        if results.values().any(|r| r.job_id == result.job_id) {
            return Err(CoreError::FatalStore("duplicate result for job".into()));
        }
        results.insert(result.id, result.clone());
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> CoreResult<Option<CrawlResult>> {
        Ok(self.results.lock().await.get(&id).cloned())
    }

    async fn update_result_history_status(
        &self,
        id: Uuid,
        status: HistoryRecordStatus,
        recorded_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        if let Some(result) = self.results.lock().await.get_mut(&id) {
            result.history_record_status = status;
            result.history_recorded_at = recorded_at;
        }
        Ok(())
    }

    async fn append_price_history(
        &self,
        url_hash: &str,
        price: Decimal,
        currency: &str,
        in_stock: bool,
        _recorded_at: DateTime<Utc>,
        _source: &str,
    ) -> CoreResult<AppendOutcome> {
        let mut history = self.price_history.lock().await;
        if let Some((last_price, last_currency, last_in_stock)) = history.get(url_hash) {
            if *last_price == price && last_currency == currency && *last_in_stock == in_stock {
                return Ok(AppendOutcome::Duplicate);
            }
        }
        history.insert(url_hash.to_string(), (price, currency.to_string(), in_stock));
        Ok(AppendOutcome::Created)
    }

    async fn get_bot_config(&self, bot_id: &str) -> CoreResult<Option<BotConfig>> {
        Ok(self.bots.lock().await.get(bot_id).cloned())
    }

    async fn get_auto_record_config(&self) -> CoreResult<Option<AutoRecordConfig>> {
        Ok(self.auto_record_config.lock().await.clone())
    }

    async fn get_cache_config(&self) -> CoreResult<Option<CacheConfig>> {
        Ok(self.cache_config.lock().await.clone())
    }
}

/// In-memory double for the cache port.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CachePort for InMemoryCache {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl_seconds: i64) -> CoreResult<()> {
        self.entries.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, prefix: &str) -> CoreResult<()> {
        self.entries.lock().await.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// In-memory double for the queue port.
#[derive(Default)]
pub struct InMemoryQueue {
    main: Mutex<VecDeque<Uuid>>,
    processing: Mutex<HashSet<Uuid>>,
    failed: Mutex<HashSet<Uuid>>,
    failures: Mutex<HashMap<Uuid, i64>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueuePort for InMemoryQueue {
    async fn enqueue(&self, id: Uuid) -> CoreResult<()> {
        self.main.lock().await.push_back(id);
        Ok(())
    }

    async fn dequeue(&self) -> CoreResult<Option<Uuid>> {
        Ok(self.main.lock().await.pop_front())
    }

    async fn mark_processing(&self, id: Uuid) -> CoreResult<()> {
        self.processing.lock().await.insert(id);
        Ok(())
    }

    async fn unmark_processing(&self, id: Uuid) -> CoreResult<()> {
        self.processing.lock().await.remove(&id);
        Ok(())
    }

    async fn is_processing(&self, id: Uuid) -> CoreResult<bool> {
        Ok(self.processing.lock().await.contains(&id))
    }

    async fn increment_failure(&self, id: Uuid) -> CoreResult<i64> {
        let mut failures = self.failures.lock().await;
        let count = failures.entry(id).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn clear_failure(&self, id: Uuid) -> CoreResult<()> {
        self.failures.lock().await.remove(&id);
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> CoreResult<()> {
        self.failed.lock().await.insert(id);
        Ok(())
    }

    async fn retry_failed(&self, limit: i64) -> CoreResult<i64> {
        let mut failed = self.failed.lock().await;
        let ids: Vec<Uuid> = failed.iter().take(limit as usize).cloned().collect();
        for id in &ids {
            failed.remove(id);
            self.main.lock().await.push_back(*id);
        }
        Ok(ids.len() as i64)
    }

    async fn stats(&self) -> CoreResult<QueueStats> {
        Ok(QueueStats {
            queue: self.main.lock().await.len() as i64,
            processing: self.processing.lock().await.len() as i64,
            failed: self.failed.lock().await.len() as i64,
        })
    }
}
