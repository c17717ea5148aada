use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resolves `bot_id -> api_token` for the HTTP boundary. Added since the
/// pull/submit authentication check has nowhere else to read credentials
/// from.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BotConfig {
    pub bot_id: String,
    pub api_token: String,
    pub enabled: bool,
    pub max_jobs_per_pull: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
