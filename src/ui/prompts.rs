//! Confirmation prompts with a non-interactive fallback

use super::context::UiContext;
use crate::error::{WheelsmithError, WheelsmithResult};

/// Ask a yes/no question; returns `default` when nobody can answer
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> WheelsmithResult<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| WheelsmithError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| WheelsmithError::User(format!("Prompt failed: {}", e)))
}
