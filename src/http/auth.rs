use crate::domain::BotConfig;
use crate::error::{CoreError, CoreResult};
use crate::ports::PersistencePort;

/// Resolves and validates the `(bot_id, api_token)` credential pair.
/// Authentication is byte-equal comparison of opaque tokens; no
/// cryptographic claims are asserted.
pub async fn authenticate_bot(
    persistence: &dyn PersistencePort,
    bot_id: &str,
    api_token: &str,
) -> CoreResult<BotConfig> {
    let bot = persistence
        .get_bot_config(bot_id)
        .await?
        .ok_or_else(|| CoreError::Authentication("unknown bot_id".into()))?;

    if bot.api_token.as_bytes() != api_token.as_bytes() {
        return Err(CoreError::Authentication("token mismatch".into()));
    }
    if !bot.enabled {
        return Err(CoreError::BotDisabled(bot_id.to_string()));
    }
    Ok(bot)
}
