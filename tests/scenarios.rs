mod common;

use std::sync::Arc;

use chrono::Utc;
use common::harness;
use crawl_coordinator::config_provider::ConfigProvider;
use crawl_coordinator::coordination::{CoordinationService, SubmitOutcome, SubmitSuccess};
use crawl_coordinator::domain::job::JobState;
use crawl_coordinator::domain::{AutoRecordConfig, CacheConfig, CrawlPolicy};
use crawl_coordinator::engine::StateMachine;
use crawl_coordinator::ports::persistence::CandidateUrl;
use crawl_coordinator::ports::{PersistencePort, QueuePort};
use rust_decimal::Decimal;
use uuid::Uuid;

fn seed_config() -> Arc<ConfigProvider> {
    Arc::new(ConfigProvider::new(AutoRecordConfig::default(), CacheConfig::default()))
}

fn electronics_policy(domain_id: Uuid) -> CrawlPolicy {
    CrawlPolicy::builder()
        .domain_id(domain_id)
        .name("electronics")
        .frequency_hours(24)
        .priority(5i16)
        .max_retries(3)
        .timeout_minutes(10)
        .build()
}

fn success_payload() -> SubmitSuccess {
    SubmitSuccess {
        price: Decimal::new(1290000, 0),
        currency: "VND".to_string(),
        title: Some("Wireless Mouse".to_string()),
        in_stock: true,
        parsed_data: Some(serde_json::json!({
            "price_sources": ["html_ml"],
            "price_extraction": {
                "extract_price_from_html_ml": {"confidence": 0.95}
            }
        })),
        raw_html: None,
    }
}

/// S1: a clean pull -> submit(success) cycle produces a DONE job, a
/// CrawlResult, and an enqueued auto-record item, and reschedules the
/// owning policy `frequency_hours` out.
#[tokio::test]
async fn s1_happy_path_pull_submit_reschedules_policy() {
    let (persistence, cache, queue) = harness();
    let domain_id = Uuid::new_v4();
    let policy = electronics_policy(domain_id);
    persistence.seed_policy(policy.clone()).await;

    let url_hash = "a".repeat(64);
    persistence
        .seed_product_url(CandidateUrl {
            url_hash: url_hash.clone(),
            normalized_url: "https://shop.example/sku/1".to_string(),
            domain_id,
        })
        .await;

    let job = crawl_coordinator::domain::CrawlJob::builder()
        .policy_id(policy.id)
        .product_url_hash(url_hash)
        .lock_ttl_seconds(policy.lock_ttl_seconds())
        .max_retries(policy.max_retries)
        .priority(policy.priority)
        .build();
    let job_id = job.id;
    persistence.insert_job(&job).await.unwrap();

    let coordination = CoordinationService::new(
        persistence.clone(),
        cache.clone(),
        queue.clone(),
        seed_config(),
        10,
    );

    let pulled = coordination.pull("bot-1", 5, None).await.unwrap();
    assert_eq!(pulled.count, 1);
    assert_eq!(pulled.jobs[0].job_id, job_id);
    assert_eq!(pulled.jobs[0].url, "https://shop.example/sku/1");

    let outcome = coordination
        .submit("bot-1", job_id, true, Some(success_payload()), None)
        .await
        .unwrap();

    match outcome {
        SubmitOutcome::Done { price, currency, policy_next_run, .. } => {
            assert_eq!(price, Decimal::new(1290000, 0));
            assert_eq!(currency, "VND");
            assert!(policy_next_run.is_some());
        }
        other => panic!("expected Done, got {other:?}"),
    }

    let stored_job = persistence.job(job_id).await;
    assert_eq!(stored_job.state, JobState::Done);
    assert!(stored_job.locked_by.is_none());

    let stored_policy = persistence.policy(policy.id).await;
    assert_eq!(stored_policy.failure_count, 0);
    assert!(stored_policy.last_success_at.is_some());

    assert_eq!(queue.stats().await.unwrap().queue, 1);
}

/// S2: two bots racing to pull the same job — only one gets the lease, the
/// other is counted as skipped.
#[tokio::test]
async fn s2_concurrent_pull_only_one_bot_wins_the_lease() {
    let (persistence, cache, queue) = harness();
    let domain_id = Uuid::new_v4();
    let policy = electronics_policy(domain_id);
    persistence.seed_policy(policy.clone()).await;

    let job = crawl_coordinator::domain::CrawlJob::builder()
        .policy_id(policy.id)
        .product_url_hash("b".repeat(64))
        .lock_ttl_seconds(policy.lock_ttl_seconds())
        .max_retries(policy.max_retries)
        .priority(policy.priority)
        .build();
    let job_id = job.id;
    persistence.insert_job(&job).await.unwrap();

    let coordination = Arc::new(CoordinationService::new(
        persistence.clone(),
        cache.clone(),
        queue.clone(),
        seed_config(),
        10,
    ));

    let a = coordination.clone();
    let b = coordination.clone();
    let (r1, r2) = tokio::join!(a.pull("bot-a", 1, None), b.pull("bot-b", 1, None));
    let r1 = r1.unwrap();
    let r2 = r2.unwrap();

    let total_leased = r1.count + r2.count;
    let total_skipped = r1.skipped + r2.skipped;
    assert_eq!(total_leased, 1, "exactly one bot must win the lease");
    assert_eq!(total_skipped, 1, "the loser must be recorded as skipped");

    let stored_job = persistence.job(job_id).await;
    assert_eq!(stored_job.state, JobState::Locked);
}

/// S3: repeated failures exhaust retries and the job terminates FAILED;
/// the owning policy's backoff grows and its failure_count increments.
#[tokio::test]
async fn s3_retry_exhaustion_terminates_job_as_failed() {
    let (persistence, cache, queue) = harness();
    let domain_id = Uuid::new_v4();
    let mut policy = electronics_policy(domain_id);
    policy.max_retries = 2;
    persistence.seed_policy(policy.clone()).await;

    let job = crawl_coordinator::domain::CrawlJob::builder()
        .policy_id(policy.id)
        .product_url_hash("c".repeat(64))
        .lock_ttl_seconds(policy.lock_ttl_seconds())
        .max_retries(2)
        .priority(policy.priority)
        .build();
    let job_id = job.id;
    persistence.insert_job(&job).await.unwrap();

    let coordination = CoordinationService::new(
        persistence.clone(),
        cache.clone(),
        queue.clone(),
        seed_config(),
        10,
    );

    for attempt in 0..3 {
        let pulled = coordination.pull("bot-1", 1, None).await.unwrap();
        assert_eq!(pulled.count, 1, "attempt {attempt}: job must be re-leasable");
        let outcome = coordination
            .submit("bot-1", job_id, false, None, Some(format!("timeout on attempt {attempt}")))
            .await
            .unwrap();

        match (attempt, outcome) {
            (0, SubmitOutcome::Retried { retry_count, max_retries, .. }) => {
                assert_eq!(retry_count, 1);
                assert_eq!(max_retries, 2);
            }
            (1, SubmitOutcome::Retried { retry_count, .. }) => {
                assert_eq!(retry_count, 2);
            }
            (2, SubmitOutcome::Exhausted { retry_count, max_retries, .. }) => {
                assert_eq!(retry_count, 2);
                assert_eq!(max_retries, 2);
            }
            (n, other) => panic!("unexpected outcome at attempt {n}: {other:?}"),
        }
    }

    let stored_job = persistence.job(job_id).await;
    assert_eq!(stored_job.state, JobState::Failed);

    let stored_policy = persistence.policy(policy.id).await;
    assert_eq!(stored_policy.failure_count, 1);
    assert!(stored_policy.next_run_at.unwrap() > Utc::now());
}

/// S4: a bot that never submits leaves its lease to expire; the scheduler's
/// sweep cycles it LOCKED -> EXPIRED -> PENDING, making it leasable again.
#[tokio::test]
async fn s4_expired_lease_is_swept_back_to_pending() {
    let (persistence, _cache, _queue) = harness();
    let domain_id = Uuid::new_v4();
    let policy = electronics_policy(domain_id);
    persistence.seed_policy(policy.clone()).await;

    let mut job = crawl_coordinator::domain::CrawlJob::builder()
        .policy_id(policy.id)
        .product_url_hash("d".repeat(64))
        .lock_ttl_seconds(60)
        .max_retries(policy.max_retries)
        .priority(policy.priority)
        .build();
    let now = Utc::now();
    job.state = JobState::Locked;
    job.locked_by = Some("bot-vanished".to_string());
    job.locked_at = Some(now - chrono::Duration::seconds(600));
    let job_id = job.id;
    persistence.save_job(&job).await.unwrap();

    let expired = persistence.sweep_expired_leases(now, 100).await.unwrap();
    assert_eq!(expired, vec![job_id]);

    let to_expired = persistence
        .advance_job_state(job_id, JobState::Locked, JobState::Expired, StateMachine::sweep_patch())
        .await
        .unwrap();
    assert!(matches!(
        to_expired,
        crawl_coordinator::ports::persistence::AdvanceOutcome::Ok(_)
    ));

    persistence
        .advance_job_state(job_id, JobState::Expired, JobState::Pending, StateMachine::sweep_patch())
        .await
        .unwrap();

    let stored = persistence.job(job_id).await;
    assert_eq!(stored.state, JobState::Pending);
    assert!(stored.locked_by.is_none());
}

/// S5: a submit that arrives after the lease has already expired (and the
/// job moved on) is rejected rather than silently accepted.
#[tokio::test]
async fn s5_late_submit_after_lease_expiry_is_rejected() {
    let (persistence, cache, queue) = harness();
    let domain_id = Uuid::new_v4();
    let policy = electronics_policy(domain_id);
    persistence.seed_policy(policy.clone()).await;

    let job = crawl_coordinator::domain::CrawlJob::builder()
        .policy_id(policy.id)
        .product_url_hash("e".repeat(64))
        .lock_ttl_seconds(1)
        .max_retries(policy.max_retries)
        .priority(policy.priority)
        .build();
    let job_id = job.id;
    persistence.insert_job(&job).await.unwrap();

    let coordination = CoordinationService::new(
        persistence.clone(),
        cache.clone(),
        queue.clone(),
        seed_config(),
        10,
    );

    let pulled = coordination.pull("bot-slow", 1, None).await.unwrap();
    assert_eq!(pulled.count, 1);

    // Force the lease into the past so it reads as expired at submit time.
    {
        let mut job = persistence.job(job_id).await;
        job.locked_at = Some(Utc::now() - chrono::Duration::seconds(120));
        persistence.save_job(&job).await.unwrap();
    }

    let err = coordination
        .submit("bot-slow", job_id, true, Some(success_payload()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, crawl_coordinator::CoreError::LeaseExpired));
}

/// S6: submitting the same (price, currency, in_stock) tuple twice for the
/// same URL must not double-append to the price-history log.
#[tokio::test]
async fn s6_auto_record_duplicate_tuple_is_not_recorded_twice() {
    let (persistence, _cache, _queue) = harness();
    let url_hash = "f".repeat(64);
    let now = Utc::now();

    let first = persistence
        .append_price_history(&url_hash, Decimal::new(1290000, 0), "VND", true, now, "AUTO")
        .await
        .unwrap();
    assert_eq!(first, crawl_coordinator::ports::persistence::AppendOutcome::Created);

    let second = persistence
        .append_price_history(&url_hash, Decimal::new(1290000, 0), "VND", true, now, "AUTO")
        .await
        .unwrap();
    assert_eq!(second, crawl_coordinator::ports::persistence::AppendOutcome::Duplicate);
}

/// S7: a result with price == 0 fails the auto-record criteria and is
/// skipped rather than appended.
#[tokio::test]
async fn s7_zero_price_result_is_skipped_by_auto_record() {
    let (persistence, cache, queue) = harness();

    let job = crawl_coordinator::domain::CrawlJob::builder()
        .policy_id(Uuid::new_v4())
        .product_url_hash("g".repeat(64))
        .max_retries(3)
        .priority(5i16)
        .build();
    let job_id = job.id;
    persistence.save_job(&job).await.unwrap();

    let result = crawl_coordinator::domain::CrawlResult::builder()
        .job_id(job_id)
        .url_hash(job.product_url_hash.clone())
        .price(Decimal::ZERO)
        .currency("VND")
        .in_stock(true)
        .build();
    let result_id = result.id;
    persistence.create_result(&result).await.unwrap();
    queue.enqueue(result_id).await.unwrap();

    let config = seed_config();
    let consumer = crawl_coordinator::auto_record::AutoRecordConsumer::new(
        persistence.clone(),
        queue.clone(),
        cache.clone(),
        config,
        10,
        3,
        10,
    );

    let outcome = consumer.run_batch().await.unwrap();
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.recorded, 0);

    let stored = persistence.get_result(result_id).await.unwrap().unwrap();
    assert_eq!(
        stored.history_record_status,
        crawl_coordinator::domain::HistoryRecordStatus::None
    );
}

#[tokio::test]
async fn s8_allowed_domains_is_resolved_from_the_product_url_not_the_hash() {
    let (persistence, cache, queue) = harness();

    let domain_id = Uuid::new_v4();
    let url_hash = "h".repeat(64);
    persistence
        .seed_product_url(CandidateUrl {
            url_hash: url_hash.clone(),
            normalized_url: "https://shop.example/electronics/sku-9".to_string(),
            domain_id,
        })
        .await;

    let job = crawl_coordinator::domain::CrawlJob::builder()
        .policy_id(Uuid::new_v4())
        .product_url_hash(url_hash.clone())
        .max_retries(3)
        .priority(5i16)
        .build();
    let job_id = job.id;
    persistence.save_job(&job).await.unwrap();

    let result = crawl_coordinator::domain::CrawlResult::builder()
        .job_id(job_id)
        .url_hash(url_hash.clone())
        .price(Decimal::new(1290000, 0))
        .currency("VND")
        .in_stock(true)
        .build();
    let result_id = result.id;
    persistence.create_result(&result).await.unwrap();
    queue.enqueue(result_id).await.unwrap();

    let mut auto_record_cfg = AutoRecordConfig::default();
    auto_record_cfg.allowed_domains = std::collections::HashSet::from(["shop.example".to_string()]);
    let config = Arc::new(ConfigProvider::new(auto_record_cfg, CacheConfig::default()));

    let consumer = crawl_coordinator::auto_record::AutoRecordConsumer::new(
        persistence.clone(),
        queue.clone(),
        cache.clone(),
        config,
        10,
        3,
        10,
    );

    let outcome = consumer.run_batch().await.unwrap();
    assert_eq!(outcome.recorded, 1, "result's domain matches allowed_domains and must be recorded");

    let stored = persistence.get_result(result_id).await.unwrap().unwrap();
    assert_eq!(
        stored.history_record_status,
        crawl_coordinator::domain::HistoryRecordStatus::Recorded
    );
}
