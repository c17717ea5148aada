use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::CoreError;

/// The long-lived scheduling recipe for a set of URLs under a domain.
///
/// `(domain_id, name)` is unique — enforced by the persistence layer, not
/// here, since uniqueness is a cross-row invariant.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, sqlx::FromRow)]
#[builder(field_defaults(setter(into)))]
pub struct CrawlPolicy {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub domain_id: Uuid,
    pub name: String,
    #[builder(default)]
    pub url_pattern: Option<String>,
    pub frequency_hours: i64,
    #[builder(default = 1)]
    pub priority: i16,
    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default = 5)]
    pub retry_backoff_minutes: i64,
    #[builder(default = 10)]
    pub timeout_minutes: i64,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub last_failed_at: Option<DateTime<Utc>>,
    #[builder(default = 0)]
    pub failure_count: i32,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

/// Cap so `retry_backoff_minutes * 2^failures` cannot overflow a 32-bit
/// minute count.
pub const BACKOFF_EXPONENT_CAP: u32 = 16;

impl CrawlPolicy {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("policy name must not be empty".into()));
        }
        if self.frequency_hours < 1 {
            return Err(CoreError::Validation("frequency_hours must be >= 1".into()));
        }
        if !(1..=20).contains(&self.priority) {
            return Err(CoreError::Validation("priority must be in 1..=20".into()));
        }
        if self.max_retries < 0 {
            return Err(CoreError::Validation("max_retries must be >= 0".into()));
        }
        if self.timeout_minutes < 1 {
            return Err(CoreError::Validation("timeout_minutes must be >= 1".into()));
        }
        Ok(())
    }

    pub fn lock_ttl_seconds(&self) -> i64 {
        self.timeout_minutes * 60
    }

    /// Whether this policy is due to materialize jobs at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.map(|t| t <= now).unwrap_or(true)
    }

    /// `next_run_at` after a successful job.
    pub fn on_success(&mut self, now: DateTime<Utc>) {
        self.last_success_at = Some(now);
        self.failure_count = 0;
        self.next_run_at = Some(now + chrono::Duration::hours(self.frequency_hours));
        self.updated_at = now;
    }

    /// `next_run_at` after a terminal failure. Backoff grows as
    /// `retry_backoff_minutes * 2^min(failure_count-1, CAP)`.
    pub fn on_failure(&mut self, now: DateTime<Utc>) {
        self.last_failed_at = Some(now);
        self.failure_count += 1;
        let exponent = (self.failure_count - 1).max(0) as u32;
        let exponent = exponent.min(BACKOFF_EXPONENT_CAP);
        let backoff_minutes = self.retry_backoff_minutes.saturating_mul(1i64 << exponent);
        self.next_run_at = Some(now + chrono::Duration::minutes(backoff_minutes));
        self.updated_at = now;
    }

    /// Advance `next_run_at` regardless of how many jobs materialized this
    /// pass, so partial success cannot cause a tight loop.
    pub fn advance_after_materialize(&mut self, now: DateTime<Utc>) {
        self.next_run_at = Some(now + chrono::Duration::hours(self.frequency_hours));
        self.updated_at = now;
    }

    /// Whether `normalized_url` matches this policy's scope. An empty or
    /// absent pattern matches everything under the domain. Matching is a
    /// full match, not a substring search.
    pub fn matches_url(&self, normalized_url: &str) -> bool {
        match &self.url_pattern {
            None => true,
            Some(pattern) if pattern.is_empty() => true,
            Some(pattern) => regex::Regex::new(&format!("^{pattern}$"))
                .map(|re| re.is_match(normalized_url))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CrawlPolicy {
        CrawlPolicy::builder()
            .domain_id(Uuid::new_v4())
            .name("electronics")
            .frequency_hours(24)
            .priority(5i16)
            .max_retries(3)
            .timeout_minutes(10)
            .build()
    }

    #[test]
    fn lock_ttl_seconds_derives_from_timeout_minutes() {
        assert_eq!(policy().lock_ttl_seconds(), 600);
    }

    #[test]
    fn backoff_is_non_decreasing_up_to_cap() {
        let mut p = policy();
        let now = Utc::now();
        let mut last_gap = chrono::Duration::zero();
        for _ in 0..20 {
            let before = p.next_run_at;
            p.on_failure(now);
            let gap = p.next_run_at.unwrap() - now;
            if before.is_some() {
                assert!(gap >= last_gap, "backoff must not shrink");
            }
            last_gap = gap;
        }
    }

    #[test]
    fn success_resets_failure_count() {
        let mut p = policy();
        let now = Utc::now();
        p.on_failure(now);
        p.on_failure(now);
        assert_eq!(p.failure_count, 2);
        p.on_success(now);
        assert_eq!(p.failure_count, 0);
        assert_eq!(p.next_run_at, Some(now + chrono::Duration::hours(24)));
    }

    #[test]
    fn empty_pattern_matches_all() {
        let p = policy();
        assert!(p.matches_url("https://amazon.co.jp/dp/123"));
    }

    #[test]
    fn rejects_invalid_priority() {
        let mut p = policy();
        p.priority = 0;
        assert!(p.validate().is_err());
    }
}
