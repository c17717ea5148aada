use chrono::{DateTime, Utc};

use crate::domain::job::JobState;
use crate::domain::CrawlJob;
use crate::error::CoreError;
use crate::ports::persistence::JobPatch;

/// The legal-transition table and the pure decision logic that sits on top
/// of it. Every method here is side-effect free; callers apply the
/// returned patch through the persistence port's CAS primitive.
pub struct StateMachine;

impl StateMachine {
    /// The legal-transition table. No other `(from, to)` pair is legal.
    pub fn is_legal(from: JobState, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (from, to),
            (Pending, Locked)
                | (Locked, Done)
                | (Locked, Pending)
                | (Locked, Failed)
                | (Locked, Expired)
                | (Expired, Pending)
                | (Expired, Locked)
        )
    }

    pub fn check_legal(from: JobState, to: JobState) -> Result<(), CoreError> {
        if Self::is_legal(from, to) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            })
        }
    }

    /// Preconditions for `submit`: the job must be locked, owned by the
    /// submitting bot, and its lease must not have expired. Does not
    /// itself change state — callers that pass this check proceed to
    /// `advance_job_state` under CAS.
    pub fn check_submit_preconditions(
        job: &CrawlJob,
        bot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if job.state != JobState::Locked {
            return Err(CoreError::JobNotLocked);
        }
        if job.locked_by.as_deref() != Some(bot_id) {
            return Err(CoreError::NotAssigned);
        }
        if job.lease_expired(now) {
            return Err(CoreError::LeaseExpired);
        }
        Ok(())
    }

    /// Whether a failed job should retry (LOCKED→PENDING) or terminate
    /// (LOCKED→FAILED). Retry accounting: `retry_count` is incremented
    /// ONLY on the LOCKED→PENDING transition.
    pub fn should_retry(job: &CrawlJob) -> bool {
        job.retry_count < job.max_retries
    }

    /// Patch for LOCKED→DONE: clears the lease. Result creation,
    /// auto-record enqueue, and cache invalidation are the coordination
    /// service's responsibility.
    pub fn success_patch() -> JobPatch {
        JobPatch::clear_lease()
    }

    /// Patch for LOCKED→PENDING (a retry): clears the lease, increments
    /// `retry_count`, records `last_error`.
    pub fn retry_patch(job: &CrawlJob, error_msg: Option<String>) -> JobPatch {
        JobPatch::clear_lease()
            .with_retry_count(job.retry_count + 1)
            .with_last_error(error_msg)
    }

    /// Patch for LOCKED→FAILED (retries exhausted): clears the lease,
    /// records `last_error`. `retry_count` is left untouched.
    pub fn failure_patch(error_msg: Option<String>) -> JobPatch {
        JobPatch::clear_lease().with_last_error(error_msg)
    }

    /// Patch for LOCKED→EXPIRED and EXPIRED→PENDING (the sweeper): both
    /// steps simply clear the lease.
    pub fn sweep_patch() -> JobPatch {
        JobPatch::clear_lease()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobState::*;

    const ALL_STATES: [JobState; 5] = [Pending, Locked, Done, Failed, Expired];

    #[test]
    fn only_table_transitions_are_legal() {
        let legal: Vec<(JobState, JobState)> = vec![
            (Pending, Locked),
            (Locked, Done),
            (Locked, Pending),
            (Locked, Failed),
            (Locked, Expired),
            (Expired, Pending),
            (Expired, Locked),
        ];
        for from in ALL_STATES {
            for to in ALL_STATES {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    StateMachine::is_legal(from, to),
                    expected,
                    "transition {from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn done_and_failed_are_dead_ends() {
        for to in ALL_STATES {
            assert!(!StateMachine::is_legal(Done, to));
            assert!(!StateMachine::is_legal(Failed, to));
        }
    }

    #[test]
    fn locked_to_locked_by_another_bot_is_illegal() {
        assert!(!StateMachine::is_legal(Locked, Locked));
    }

    #[test]
    fn retry_exhaustion_boundary() {
        let job = CrawlJob::builder()
            .policy_id(uuid::Uuid::new_v4())
            .product_url_hash("a".repeat(64))
            .max_retries(2)
            .priority(5i16)
            .retry_count(2)
            .build();
        assert!(!StateMachine::should_retry(&job));

        let mut under = job.clone();
        under.retry_count = 1;
        assert!(StateMachine::should_retry(&under));
    }
}
