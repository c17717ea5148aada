use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::coordination::{CoordinationService, SubmitOutcome, SubmitSuccess};
use crate::error::CoreError;
use crate::http::auth::authenticate_bot;
use crate::http::envelope::ok_response;
use crate::ports::{CachePort, PersistencePort, QueuePort};

/// Max length for `bot_id` on any request carrying one.
const MAX_BOT_ID_LEN: usize = 100;

pub struct AppState<P: PersistencePort, C: CachePort, Q: QueuePort> {
    pub persistence: Arc<P>,
    pub cache: Arc<C>,
    pub coordination: Arc<CoordinationService<P, C, Q>>,
    pub config: Arc<Config>,
}

impl<P: PersistencePort, C: CachePort, Q: QueuePort> Clone for AppState<P, C, Q> {
    fn clone(&self) -> Self {
        Self {
            persistence: self.persistence.clone(),
            cache: self.cache.clone(),
            coordination: self.coordination.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub bot_id: String,
    pub api_token: String,
    #[serde(default)]
    pub max_jobs: Option<i64>,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PullJobWire {
    pub job_id: Uuid,
    pub url: String,
    pub priority: i16,
    pub max_retries: i32,
    pub timeout_seconds: i64,
    pub retry_count: i32,
    pub locked_until: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct PullResponseWire {
    pub jobs: Vec<PullJobWire>,
    pub count: usize,
    pub skipped: usize,
}

pub async fn pull_handler<P: PersistencePort, C: CachePort, Q: QueuePort>(
    State(state): State<AppState<P, C, Q>>,
    Json(req): Json<PullRequest>,
) -> Response {
    match handle_pull(&state, req).await {
        Ok(resp) => ok_response(StatusCode::OK, resp),
        Err(e) => e.into_response(),
    }
}

async fn handle_pull<P: PersistencePort, C: CachePort, Q: QueuePort>(
    state: &AppState<P, C, Q>,
    req: PullRequest,
) -> Result<PullResponseWire, CoreError> {
    if req.bot_id.len() > MAX_BOT_ID_LEN {
        return Err(CoreError::Validation("bot_id too long".into()));
    }
    let bot = authenticate_bot(state.persistence.as_ref(), &req.bot_id, &req.api_token).await?;

    let requested = req.max_jobs.unwrap_or(state.config.default_max_jobs_per_pull);
    let max_jobs = requested.clamp(1, bot.max_jobs_per_pull.min(state.config.hard_cap_jobs_per_pull));

    let resp = state
        .coordination
        .pull(&req.bot_id, max_jobs, req.domain.as_deref())
        .await?;

    Ok(PullResponseWire {
        jobs: resp
            .jobs
            .into_iter()
            .map(|j| PullJobWire {
                job_id: j.job_id,
                url: j.url,
                priority: j.priority,
                max_retries: j.max_retries,
                timeout_seconds: j.timeout_seconds,
                retry_count: j.retry_count,
                locked_until: j.locked_until,
            })
            .collect(),
        count: resp.count,
        skipped: resp.skipped,
    })
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub bot_id: String,
    pub api_token: String,
    pub job_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub price: Option<rust_decimal::Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
    #[serde(default)]
    pub parsed_data: Option<serde_json::Value>,
    #[serde(default)]
    pub raw_html: Option<String>,
    #[serde(default)]
    pub error_msg: Option<String>,
}

fn default_in_stock() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SubmitResponseWire {
    Done {
        result_id: Uuid,
        job_id: Uuid,
        status: &'static str,
        price: rust_decimal::Decimal,
        currency: String,
        policy_next_run: Option<chrono::DateTime<chrono::Utc>>,
    },
    Pending {
        job_id: Uuid,
        status: &'static str,
        retry_count: i32,
        max_retries: i32,
        message: String,
    },
    Failed {
        job_id: Uuid,
        status: &'static str,
        retry_count: i32,
        max_retries: i32,
        error: Option<String>,
        message: String,
    },
}

pub async fn submit_handler<P: PersistencePort, C: CachePort, Q: QueuePort>(
    State(state): State<AppState<P, C, Q>>,
    Json(req): Json<SubmitRequest>,
) -> Response {
    match handle_submit(&state, req).await {
        Ok((status, resp)) => ok_response(status, resp),
        Err(e) => e.into_response(),
    }
}

async fn handle_submit<P: PersistencePort, C: CachePort, Q: QueuePort>(
    state: &AppState<P, C, Q>,
    req: SubmitRequest,
) -> Result<(StatusCode, SubmitResponseWire), CoreError> {
    if req.bot_id.len() > MAX_BOT_ID_LEN {
        return Err(CoreError::Validation("bot_id too long".into()));
    }
    authenticate_bot(state.persistence.as_ref(), &req.bot_id, &req.api_token).await?;

    let success_data = if req.success {
        Some(SubmitSuccess {
            price: req
                .price
                .ok_or_else(|| CoreError::Validation("price is required on success".into()))?,
            currency: req
                .currency
                .ok_or_else(|| CoreError::Validation("currency is required on success".into()))?,
            title: req.title,
            in_stock: req.in_stock,
            parsed_data: req.parsed_data,
            raw_html: req.raw_html,
        })
    } else {
        None
    };

    let outcome = state
        .coordination
        .submit(&req.bot_id, req.job_id, req.success, success_data, req.error_msg)
        .await?;

    Ok(match outcome {
        SubmitOutcome::Done { result_id, job_id, price, currency, policy_next_run } => (
            StatusCode::CREATED,
            SubmitResponseWire::Done {
                result_id,
                job_id,
                status: "done",
                price,
                currency,
                policy_next_run,
            },
        ),
        SubmitOutcome::Retried { job_id, retry_count, max_retries } => (
            StatusCode::OK,
            SubmitResponseWire::Pending {
                job_id,
                status: "pending",
                retry_count,
                max_retries,
                message: "submission failed, job will be retried".to_string(),
            },
        ),
        SubmitOutcome::Exhausted { job_id, retry_count, max_retries, error } => (
            StatusCode::OK,
            SubmitResponseWire::Failed {
                job_id,
                status: "failed",
                retry_count,
                max_retries,
                error,
                message: "submission failed, retries exhausted".to_string(),
            },
        ),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub cache: &'static str,
}

pub async fn health_handler<P: PersistencePort, C: CachePort, Q: QueuePort>(
    State(state): State<AppState<P, C, Q>>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_ok = state.persistence.get_bot_config("__health_check__").await.is_ok();
    let cache_ok = state.cache.ping().await.is_ok();

    let healthy = db_ok && cache_ok;
    (
        if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE },
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" },
            database: if db_ok { "ok" } else { "error" },
            cache: if cache_ok { "ok" } else { "error" },
        }),
    )
}
