use axum::http::StatusCode;
use thiserror::Error;

/// The error taxonomy shared by every layer above the storage ports.
///
/// Variants map onto HTTP status codes only at the boundary (`http::envelope`);
/// everything below that layer matches on the kind, not the status code.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    /// Authenticated credentials, but the bot account itself is disabled —
    /// a 403, distinct from the 401 given for a bad token.
    #[error("bot disabled: {0}")]
    BotDisabled(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("job not locked")]
    JobNotLocked,

    #[error("lease expired")]
    LeaseExpired,

    #[error("not assigned to this bot")]
    NotAssigned,

    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition { from: String, to: String },

    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("fatal store error: {0}")]
    FatalStore(String),
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Authentication(_) => StatusCode::UNAUTHORIZED,
            CoreError::BotDisabled(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::JobNotLocked | CoreError::LeaseExpired => StatusCode::BAD_REQUEST,
            CoreError::NotAssigned => StatusCode::FORBIDDEN,
            CoreError::IllegalTransition { .. } => StatusCode::BAD_REQUEST,
            CoreError::TransientStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::FatalStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `error` string used in the response envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::Authentication(_) => "authentication_error",
            CoreError::BotDisabled(_) => "authentication_error",
            CoreError::NotFound(_) => "job_not_found",
            CoreError::JobNotLocked => "job_not_locked",
            CoreError::LeaseExpired => "lock_expired",
            CoreError::NotAssigned => "not_assigned",
            CoreError::IllegalTransition { .. } => "illegal_transition",
            CoreError::TransientStore(_) | CoreError::FatalStore(_) => "internal_error",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => CoreError::NotFound(e.to_string()),
            _ => CoreError::TransientStore(e.to_string()),
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::TransientStore(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
