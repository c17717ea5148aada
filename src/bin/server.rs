use std::sync::Arc;

use anyhow::{Context, Result};
use crawl_coordinator::auto_record::AutoRecordConsumer;
use crawl_coordinator::config_provider::ConfigProvider;
use crawl_coordinator::coordination::CoordinationService;
use crawl_coordinator::domain::CacheConfig;
use crawl_coordinator::http::routes::AppState;
use crawl_coordinator::ports::PersistencePort;
use crawl_coordinator::scheduler::PolicyScheduler;
use crawl_coordinator::service::Service;
use crawl_coordinator::store::{PostgresPersistence, RedisCache, RedisQueue};
use crawl_coordinator::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let persistence = Arc::new(PostgresPersistence::new(pool));
    let cache = Arc::new(
        RedisCache::connect(&config.redis_url)
            .await
            .context("failed to connect to redis (cache)")?,
    );
    let queue = Arc::new(
        RedisQueue::connect(&config.redis_url)
            .await
            .context("failed to connect to redis (queue)")?,
    );

    let auto_record_cfg = persistence
        .get_auto_record_config()
        .await
        .context("failed to load auto-record config")?
        .unwrap_or_default();
    let cache_cfg = persistence
        .get_cache_config()
        .await
        .context("failed to load cache config")?
        .unwrap_or_else(|| CacheConfig {
            default_ttl_seconds: config.default_cache_ttl_seconds,
            ..CacheConfig::default()
        });

    let config_provider = Arc::new(ConfigProvider::new(auto_record_cfg, cache_cfg));

    let auto_record = Arc::new(AutoRecordConsumer::new(
        persistence.clone(),
        queue.clone(),
        cache.clone(),
        config_provider.clone(),
        config.auto_record_batch,
        config.auto_record_max_retries,
        config.auto_record_retry_every_n_batches,
    ));

    let coordination = Arc::new(CoordinationService::new(
        persistence.clone(),
        cache.clone(),
        queue.clone(),
        config_provider.clone(),
        config.hard_cap_jobs_per_pull,
    ));

    let scheduler = Box::new(PolicyScheduler::new(
        persistence.clone(),
        cache.clone(),
        auto_record,
        config_provider.clone(),
        config.scheduler_interval_secs,
        config.policy_batch,
        config.lease_sweep_batch,
    ));

    let shutdown = CancellationToken::new();
    let scheduler_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(async move {
        tracing::info!(service = scheduler.name(), "starting background service");
        scheduler.run(scheduler_shutdown).await;
    });

    let app_state = AppState { persistence, cache, coordination, config: config.clone() };
    let app = crawl_coordinator::http::build_app(app_state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .context("failed to bind http listener")?;
    tracing::info!(port = config.http_port, "coordinator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("http server error")?;

    shutdown.cancel();
    scheduler_handle.await.ok();

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("received shutdown signal");
    shutdown.cancel();
}
