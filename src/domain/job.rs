use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::CoreError;

/// One attempted execution of a URL under a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Locked,
    Done,
    Failed,
    Expired,
}

impl JobState {
    /// DONE and FAILED are terminal; EXPIRED is recoverable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn is_leased(&self) -> bool {
        matches!(self, JobState::Locked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, sqlx::FromRow)]
#[builder(field_defaults(setter(into)))]
pub struct CrawlJob {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub policy_id: Uuid,
    pub product_url_hash: String,
    #[builder(default = JobState::Pending)]
    pub state: JobState,
    #[builder(default)]
    pub locked_by: Option<String>,
    #[builder(default)]
    pub locked_at: Option<DateTime<Utc>>,
    #[builder(default = 600)]
    pub lock_ttl_seconds: i64,
    #[builder(default = 0)]
    pub retry_count: i32,
    pub max_retries: i32,
    pub priority: i16,
    #[builder(default)]
    pub last_error: Option<String>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl CrawlJob {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.lock_ttl_seconds <= 0 {
            return Err(CoreError::Validation("lock_ttl_seconds must be > 0".into()));
        }
        if self.retry_count > self.max_retries {
            return Err(CoreError::Validation("retry_count exceeds max_retries".into()));
        }
        let lease_fields_consistent =
            self.locked_by.is_some() == (self.state == JobState::Locked)
                && self.locked_at.is_some() == (self.state == JobState::Locked);
        if !lease_fields_consistent {
            return Err(CoreError::Validation(
                "locked_by/locked_at must be set iff state is LOCKED".into(),
            ));
        }
        Ok(())
    }

    /// Whether the current lease, if any, has expired at `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match self.locked_at {
            Some(locked_at) => now - locked_at >= chrono::Duration::seconds(self.lock_ttl_seconds),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> CrawlJob {
        CrawlJob::builder()
            .policy_id(Uuid::new_v4())
            .product_url_hash("a".repeat(64))
            .max_retries(3)
            .priority(5i16)
            .build()
    }

    #[test]
    fn defaults_to_pending_and_unlocked() {
        let j = job();
        assert_eq!(j.state, JobState::Pending);
        assert!(j.locked_by.is_none());
        assert!(j.validate().is_ok());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Done.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Expired.is_terminal());
        assert!(!JobState::Pending.is_terminal());
    }

    #[test]
    fn lease_fields_must_be_consistent() {
        let mut j = job();
        j.locked_by = Some("bot-1".into());
        assert!(j.validate().is_err());
    }

    #[test]
    fn lease_expiry_uses_ttl() {
        let mut j = job();
        let now = Utc::now();
        j.state = JobState::Locked;
        j.locked_by = Some("bot-1".into());
        j.locked_at = Some(now - chrono::Duration::seconds(700));
        j.lock_ttl_seconds = 600;
        assert!(j.lease_expired(now));
    }
}
