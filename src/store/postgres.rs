use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::job::JobState;
use crate::domain::result::AutoRecordConfig;
use crate::domain::{BotConfig, CacheConfig, CrawlJob, CrawlPolicy, CrawlResult, HistoryRecordStatus};
use crate::error::{CoreError, CoreResult};
use crate::ports::persistence::{
    AdvanceOutcome, AppendOutcome, CandidateUrl, JobPatch, LeaseOutcome, PersistencePort,
};

/// Postgres-backed implementation of the persistence port. The lease CAS
/// (`try_lease_job`) and guarded transition (`advance_job_state`) are each
/// a single `UPDATE ... WHERE ... RETURNING` statement — no cross-row
/// locks required.
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistencePort for PostgresPersistence {
    async fn get_policy(&self, id: Uuid) -> CoreResult<Option<CrawlPolicy>> {
        let policy = sqlx::query_as::<_, CrawlPolicy>("SELECT * FROM policy WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(policy)
    }

    async fn list_due_policies(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<CrawlPolicy>> {
        let policies = sqlx::query_as::<_, CrawlPolicy>(
            r#"
            SELECT * FROM policy
            WHERE enabled AND (next_run_at IS NULL OR next_run_at <= $1)
            ORDER BY priority DESC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(policies)
    }

    async fn save_policy(&self, policy: &CrawlPolicy) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO policy (
                id, domain_id, name, url_pattern, frequency_hours, priority,
                max_retries, retry_backoff_minutes, timeout_minutes, enabled,
                next_run_at, last_success_at, last_failed_at, failure_count,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                url_pattern = EXCLUDED.url_pattern,
                frequency_hours = EXCLUDED.frequency_hours,
                priority = EXCLUDED.priority,
                max_retries = EXCLUDED.max_retries,
                retry_backoff_minutes = EXCLUDED.retry_backoff_minutes,
                timeout_minutes = EXCLUDED.timeout_minutes,
                enabled = EXCLUDED.enabled,
                next_run_at = EXCLUDED.next_run_at,
                last_success_at = EXCLUDED.last_success_at,
                last_failed_at = EXCLUDED.last_failed_at,
                failure_count = EXCLUDED.failure_count,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(policy.id)
        .bind(policy.domain_id)
        .bind(&policy.name)
        .bind(&policy.url_pattern)
        .bind(policy.frequency_hours)
        .bind(policy.priority)
        .bind(policy.max_retries)
        .bind(policy.retry_backoff_minutes)
        .bind(policy.timeout_minutes)
        .bind(policy.enabled)
        .bind(policy.next_run_at)
        .bind(policy.last_success_at)
        .bind(policy.last_failed_at)
        .bind(policy.failure_count)
        .bind(policy.created_at)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_policy_schedule(&self, policy: &CrawlPolicy) -> CoreResult<()> {
        // `failure_count` is last-writer-wins here: concurrent terminal
        // transitions on the same policy are rare, and the caller (the
        // state machine) already computed the new value before calling
        // this method.
        sqlx::query(
            r#"
            UPDATE policy SET
                next_run_at = $2,
                last_success_at = $3,
                last_failed_at = $4,
                failure_count = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(policy.id)
        .bind(policy.next_run_at)
        .bind(policy.last_success_at)
        .bind(policy.last_failed_at)
        .bind(policy.failure_count)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_candidate_urls(
        &self,
        domain_id: Uuid,
        limit: i64,
        cursor: Option<String>,
    ) -> CoreResult<Vec<CandidateUrl>> {
        let rows = sqlx::query_as::<_, (String, String, Uuid)>(
            r#"
            SELECT url_hash, normalized_url, domain_id FROM product_url
            WHERE domain_id = $1 AND ($2::text IS NULL OR normalized_url > $2)
            ORDER BY normalized_url ASC
            LIMIT $3
            "#,
        )
        .bind(domain_id)
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(url_hash, normalized_url, domain_id)| CandidateUrl {
                url_hash,
                normalized_url,
                domain_id,
            })
            .collect())
    }

    async fn get_product_url(&self, url_hash: &str) -> CoreResult<Option<CandidateUrl>> {
        let row = sqlx::query_as::<_, (String, String, Uuid)>(
            "SELECT url_hash, normalized_url, domain_id FROM product_url WHERE url_hash = $1",
        )
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(url_hash, normalized_url, domain_id)| CandidateUrl {
            url_hash,
            normalized_url,
            domain_id,
        }))
    }

    async fn find_pending_jobs(
        &self,
        domain_filter: Option<&str>,
        max: i64,
    ) -> CoreResult<Vec<CrawlJob>> {
        // `domain_filter` is a substring match over the joined ProductURL's
        // normalized_url; the join target is an externally-owned table the
        // core only reads by hash.
        let jobs = sqlx::query_as::<_, CrawlJob>(
            r#"
            SELECT j.* FROM job j
            LEFT JOIN product_url u ON u.url_hash = j.product_url_hash
            WHERE j.state = 'PENDING'
              AND ($1::text IS NULL OR u.normalized_url ILIKE '%' || $1 || '%')
            ORDER BY j.priority DESC, j.created_at ASC
            LIMIT $2
            "#,
        )
        .bind(domain_filter)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn get_job(&self, id: Uuid) -> CoreResult<Option<CrawlJob>> {
        let job = sqlx::query_as::<_, CrawlJob>("SELECT * FROM job WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn save_job(&self, job: &CrawlJob) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE job SET
                state = $2, locked_by = $3, locked_at = $4, lock_ttl_seconds = $5,
                retry_count = $6, last_error = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.state)
        .bind(&job.locked_by)
        .bind(job.locked_at)
        .bind(job.lock_ttl_seconds)
        .bind(job.retry_count)
        .bind(&job.last_error)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_active_job(&self, policy_id: Uuid, product_url_hash: &str) -> CoreResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM job
                WHERE policy_id = $1 AND product_url_hash = $2
                  AND state NOT IN ('DONE', 'FAILED')
            )
            "#,
        )
        .bind(policy_id)
        .bind(product_url_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_job(&self, job: &CrawlJob) -> CoreResult<()> {
        // The unique index on (policy_id, product_url_hash) among
        // non-terminal states turns a race between two materializer
        // passes into a `FatalStore` error here rather than a silent
        // duplicate; callers are expected to have checked `has_active_job`
        // first, so a conflict indicates a genuine race, not routine flow.
        let result = sqlx::query(
            r#"
            INSERT INTO job (
                id, policy_id, product_url_hash, state, locked_by, locked_at,
                lock_ttl_seconds, retry_count, max_retries, priority, last_error,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(job.id)
        .bind(job.policy_id)
        .bind(&job.product_url_hash)
        .bind(job.state)
        .bind(&job.locked_by)
        .bind(job.locked_at)
        .bind(job.lock_ttl_seconds)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.priority)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                CoreError::FatalStore(format!("duplicate active job for policy/url: {db_err}")),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn try_lease_job(
        &self,
        job_id: Uuid,
        bot_id: &str,
        now: DateTime<Utc>,
        ttl_seconds: i64,
    ) -> CoreResult<LeaseOutcome> {
        let leased = sqlx::query_as::<_, CrawlJob>(
            r#"
            UPDATE job SET
                state = 'LOCKED', locked_by = $2, locked_at = $3,
                lock_ttl_seconds = $4, updated_at = $3
            WHERE id = $1
              AND (
                state = 'PENDING'
                OR state = 'EXPIRED'
                OR (state = 'LOCKED' AND locked_at < $3 - (lock_ttl_seconds || ' seconds')::interval)
              )
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(bot_id)
        .bind(now)
        .bind(ttl_seconds)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match leased {
            Some(job) => LeaseOutcome::Leased(Box::new(job)),
            None => LeaseOutcome::AlreadyLeased,
        })
    }

    async fn advance_job_state(
        &self,
        job_id: Uuid,
        from_state: JobState,
        to_state: JobState,
        patch: JobPatch,
    ) -> CoreResult<AdvanceOutcome> {
        // COALESCE-against-self pattern: an unset patch field (`None`)
        // leaves the column untouched; a set field (`Some(v)`) overwrites
        // it, including overwriting back to NULL via `Some(None)`.
        let locked_by_set = patch.locked_by.is_some();
        let locked_by_val = patch.locked_by.flatten();
        let locked_at_set = patch.locked_at.is_some();
        let locked_at_val = patch.locked_at.flatten();
        let last_error_set = patch.last_error.is_some();
        let last_error_val = patch.last_error.flatten();

        let updated = sqlx::query_as::<_, CrawlJob>(
            r#"
            UPDATE job SET
                state = $3,
                locked_by = CASE WHEN $4 THEN $5 ELSE locked_by END,
                locked_at = CASE WHEN $6 THEN $7 ELSE locked_at END,
                lock_ttl_seconds = COALESCE($8, lock_ttl_seconds),
                retry_count = COALESCE($9, retry_count),
                last_error = CASE WHEN $10 THEN $11 ELSE last_error END,
                updated_at = now()
            WHERE id = $1 AND state = $2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(from_state)
        .bind(to_state)
        .bind(locked_by_set)
        .bind(locked_by_val)
        .bind(locked_at_set)
        .bind(locked_at_val)
        .bind(patch.lock_ttl_seconds)
        .bind(patch.retry_count)
        .bind(last_error_set)
        .bind(last_error_val)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match updated {
            Some(job) => AdvanceOutcome::Ok(Box::new(job)),
            None => AdvanceOutcome::Mismatch,
        })
    }

    async fn sweep_expired_leases(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM job
            WHERE state = 'LOCKED'
              AND locked_at < $1 - (lock_ttl_seconds || ' seconds')::interval
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn create_result(&self, result: &CrawlResult) -> CoreResult<()> {
        let insert = sqlx::query(
            r#"
            INSERT INTO result (
                id, job_id, url_hash, price, currency, title, in_stock,
                parsed_data, raw_html, crawled_at, history_record_status,
                history_recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(result.id)
        .bind(result.job_id)
        .bind(&result.url_hash)
        .bind(result.price)
        .bind(&result.currency)
        .bind(&result.title)
        .bind(result.in_stock)
        .bind(&result.parsed_data)
        .bind(&result.raw_html)
        .bind(result.crawled_at)
        .bind(result.history_record_status)
        .bind(result.history_recorded_at)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                CoreError::FatalStore(format!("duplicate result for job {}: {db_err}", result.job_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_result(&self, id: Uuid) -> CoreResult<Option<CrawlResult>> {
        let result = sqlx::query_as::<_, CrawlResult>("SELECT * FROM result WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(result)
    }

    async fn update_result_history_status(
        &self,
        id: Uuid,
        status: HistoryRecordStatus,
        recorded_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        sqlx::query(
            "UPDATE result SET history_record_status = $2, history_recorded_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_price_history(
        &self,
        url_hash: &str,
        price: Decimal,
        currency: &str,
        in_stock: bool,
        recorded_at: DateTime<Utc>,
        source: &str,
    ) -> CoreResult<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        let last: Option<(Decimal, String, bool)> = sqlx::query_as(
            r#"
            SELECT price, currency, in_stock FROM price_history
            WHERE url_hash = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(url_hash)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((last_price, last_currency, last_in_stock)) = last {
            if last_price == price && last_currency == currency && last_in_stock == in_stock {
                tx.commit().await?;
                return Ok(AppendOutcome::Duplicate);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO price_history (id, url_hash, price, currency, in_stock, recorded_at, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(url_hash)
        .bind(price)
        .bind(currency)
        .bind(in_stock)
        .bind(recorded_at)
        .bind(source)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AppendOutcome::Created)
    }

    async fn get_bot_config(&self, bot_id: &str) -> CoreResult<Option<BotConfig>> {
        let bot = sqlx::query_as::<_, BotConfig>("SELECT * FROM bot_config WHERE bot_id = $1")
            .bind(bot_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(bot)
    }

    /// Single-row table holding the whole config as JSONB, since
    /// `allowed_sources`/`allowed_domains`/`currency_whitelist` are
    /// operator-edited sets with no fixed column shape.
    async fn get_auto_record_config(&self) -> CoreResult<Option<AutoRecordConfig>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT config FROM auto_record_config ORDER BY updated_at DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(v,)| serde_json::from_value(v).ok()))
    }

    async fn get_cache_config(&self) -> CoreResult<Option<CacheConfig>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT config FROM cache_config ORDER BY updated_at DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(v,)| serde_json::from_value(v).ok()))
    }
}
