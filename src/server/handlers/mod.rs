//! Request handlers.

pub mod chat;
pub mod complete;
pub mod generate;
pub mod health;

use crate::server::error::ApiError;
use crate::server::state::AppState;
use crate::types::{GenerationOptions, OptionsPayload};

/// Validates the options a request sent, or falls back to the server defaults
pub(crate) fn request_options(
    state: &AppState,
    payload: Option<OptionsPayload>,
) -> Result<GenerationOptions, ApiError> {
    match payload {
        Some(payload) => Ok(GenerationOptions::try_from(payload)?),
        None => Ok(state.default_options.clone()),
    }
}
