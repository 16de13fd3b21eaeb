//! Code completion handler.

use axum::{extract::State, Json};

use crate::server::error::ApiError;
use crate::server::models::{CodeCompletionRequest, CodeCompletionResponse};
use crate::server::state::AppState;
use crate::truncate_str;
use crate::types::{GenerationOptions, Message, OptionsPayload};

const COMPLETION_SYSTEM_PROMPT: &str = "You are a helpful code completion assistant.";

/// Model id reported for requests that do not name one
const COMPLETION_MODEL: &str = "default";

/// Complete a code snippet.
///
/// The snippet is sent as the user turn of a short chat, and
/// `max_new_tokens` replaces the server's default `num_predict`.
pub async fn handle_complete(
    State(state): State<AppState>,
    Json(req): Json<CodeCompletionRequest>,
) -> Result<Json<CodeCompletionResponse>, ApiError> {
    if req.prompt.is_empty() {
        return Err(ApiError::InvalidRequest("prompt must not be empty".to_string()));
    }
    let options = GenerationOptions::try_from(OptionsPayload {
        num_predict: req.max_new_tokens,
        ..OptionsPayload::from(&state.default_options)
    })?;

    tracing::debug!("Completion request: {}...", truncate_str(&req.prompt, 50));

    let history = vec![Message::system(COMPLETION_SYSTEM_PROMPT), Message::user(req.prompt)];
    let result = state.engine.complete(history, options, COMPLETION_MODEL).await?;

    Ok(Json(CodeCompletionResponse {
        completion: result.message.content,
    }))
}
