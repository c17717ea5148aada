use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::job::JobState;
use crate::domain::result::AutoRecordConfig;
use crate::domain::{BotConfig, CacheConfig, CrawlJob, CrawlPolicy, CrawlResult, HistoryRecordStatus};
use crate::error::CoreResult;

/// Outcome of the atomic lease CAS.
#[derive(Debug, Clone)]
pub enum LeaseOutcome {
    Leased(Box<CrawlJob>),
    AlreadyLeased,
}

/// Outcome of a guarded state transition via `advance_job_state`.
#[derive(Debug, Clone)]
pub enum AdvanceOutcome {
    Ok(Box<CrawlJob>),
    Mismatch,
}

/// Outcome of an append to the external price-history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Created,
    Duplicate,
}

/// A weak reference to an externally-owned ProductURL, addressed by hash
/// — referenced, not owned by this core.
#[derive(Debug, Clone)]
pub struct CandidateUrl {
    pub url_hash: String,
    pub normalized_url: String,
    pub domain_id: Uuid,
}

/// Source tag recorded alongside an auto-record append.
pub const AUTO_RECORD_SOURCE: &str = "AUTO";

/// The persistence contracts the rest of the core depends on.
///
/// Every mutating method fails with `CoreError::TransientStore` (retryable)
/// or `CoreError::FatalStore` (caller must surface), never silently.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn get_policy(&self, id: Uuid) -> CoreResult<Option<CrawlPolicy>>;

    /// Due means `enabled ∧ next_run_at ≤ now`, highest priority first.
    async fn list_due_policies(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<CrawlPolicy>>;

    async fn save_policy(&self, policy: &CrawlPolicy) -> CoreResult<()>;

    async fn update_policy_schedule(&self, policy: &CrawlPolicy) -> CoreResult<()>;

    /// Bounded per-policy scan over candidate ProductURLs, with an
    /// explicit page size and cursor rather than an unbounded enumeration
    /// (see DESIGN.md).
    async fn list_candidate_urls(
        &self,
        domain_id: Uuid,
        limit: i64,
        cursor: Option<String>,
    ) -> CoreResult<Vec<CandidateUrl>>;

    /// Resolves a single ProductURL by its weak-reference hash, used to
    /// populate the `url` field of a leased-job wire response.
    async fn get_product_url(&self, url_hash: &str) -> CoreResult<Option<CandidateUrl>>;

    /// Ordering is `priority DESC, created_at ASC`.
    async fn find_pending_jobs(
        &self,
        domain_filter: Option<&str>,
        max: i64,
    ) -> CoreResult<Vec<CrawlJob>>;

    async fn get_job(&self, id: Uuid) -> CoreResult<Option<CrawlJob>>;

    async fn save_job(&self, job: &CrawlJob) -> CoreResult<()>;

    /// Whether a non-terminal job already exists for `(policy_id,
    /// product_url_hash)` — enforces the duplicate-job ban during
    /// materialization.
    async fn has_active_job(&self, policy_id: Uuid, product_url_hash: &str) -> CoreResult<bool>;

    async fn insert_job(&self, job: &CrawlJob) -> CoreResult<()>;

    /// Atomic CAS: succeeds iff PENDING, or LOCKED with an expired lease, or
    /// EXPIRED. A single `UPDATE ... WHERE ... RETURNING` in the Postgres
    /// implementation.
    async fn try_lease_job(
        &self,
        job_id: Uuid,
        bot_id: &str,
        now: DateTime<Utc>,
        ttl_seconds: i64,
    ) -> CoreResult<LeaseOutcome>;

    /// CAS on current state. `patch` is applied only if `from_state` still
    /// matches what's persisted.
    async fn advance_job_state(
        &self,
        job_id: Uuid,
        from_state: JobState,
        to_state: JobState,
        patch: JobPatch,
    ) -> CoreResult<AdvanceOutcome>;

    /// Selects LOCKED rows whose `locked_at + lock_ttl_seconds < now`, for
    /// the periodic lease sweep.
    async fn sweep_expired_leases(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Uuid>>;

    async fn create_result(&self, result: &CrawlResult) -> CoreResult<()>;

    async fn get_result(&self, id: Uuid) -> CoreResult<Option<CrawlResult>>;

    async fn update_result_history_status(
        &self,
        id: Uuid,
        status: HistoryRecordStatus,
        recorded_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()>;

    /// `Duplicate` means the most recent recorded price for `url_hash`
    /// equals the new `(price, currency, in_stock)` tuple.
    async fn append_price_history(
        &self,
        url_hash: &str,
        price: Decimal,
        currency: &str,
        in_stock: bool,
        recorded_at: DateTime<Utc>,
        source: &str,
    ) -> CoreResult<AppendOutcome>;

    async fn get_bot_config(&self, bot_id: &str) -> CoreResult<Option<BotConfig>>;

    /// Loads the single operator-editable auto-record config row, if one
    /// has been written out-of-band. `None` means "use the built-in
    /// default" rather than an error.
    async fn get_auto_record_config(&self) -> CoreResult<Option<AutoRecordConfig>>;

    /// Loads the single operator-editable cache config row, if one has
    /// been written out-of-band.
    async fn get_cache_config(&self) -> CoreResult<Option<CacheConfig>>;
}

/// Fields the state machine may rewrite on a transition. All fields are optional —
/// unset fields are left untouched by the persistence layer.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub locked_by: Option<Option<String>>,
    pub locked_at: Option<Option<DateTime<Utc>>>,
    pub lock_ttl_seconds: Option<i64>,
    pub retry_count: Option<i32>,
    pub last_error: Option<Option<String>>,
}

impl JobPatch {
    pub fn clear_lease() -> Self {
        Self {
            locked_by: Some(None),
            locked_at: Some(None),
            ..Default::default()
        }
    }

    pub fn set_lease(bot_id: String, now: DateTime<Utc>, ttl_seconds: i64) -> Self {
        Self {
            locked_by: Some(Some(bot_id)),
            locked_at: Some(Some(now)),
            lock_ttl_seconds: Some(ttl_seconds),
            ..Default::default()
        }
    }

    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }
}
