pub mod auth;
pub mod envelope;
pub mod routes;

use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{BoxError, Router};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::ports::{CachePort, PersistencePort, QueuePort};
use routes::AppState;

/// Bounds how long a single request may take end to end, so a hung
/// downstream Postgres or Redis call can't pin a connection forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

async fn handle_timeout(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled error: {err}"))
    }
}

/// Builds the HTTP boundary router: `/pull`, `/submit`, `/health`.
pub fn build_app<P, C, Q>(state: AppState<P, C, Q>) -> Router
where
    P: PersistencePort + 'static,
    C: CachePort + 'static,
    Q: QueuePort + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::POST, Method::GET]);

    Router::new()
        .route("/pull", post(routes::pull_handler::<P, C, Q>))
        .route("/submit", post(routes::submit_handler::<P, C, Q>))
        .route("/health", get(routes::health_handler::<P, C, Q>))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}
