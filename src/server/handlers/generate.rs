//! Raw prompt completion handler.

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;

use crate::inference::CompletionStream;
use crate::server::error::ApiError;
use crate::server::handlers::request_options;
use crate::server::models::{GenerateRequest, GenerateResponse, StreamedGenerateResponse};
use crate::server::state::AppState;
use crate::truncate_str;

/// Continue a prompt as is, with no chat template applied.
pub async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    if req.prompt.is_empty() {
        return Err(ApiError::InvalidRequest("prompt must not be empty".to_string()));
    }
    let options = request_options(&state, req.options)?;

    tracing::debug!(
        model = %req.model,
        stream = req.stream,
        keep_alive = options.keep_alive(),
        "Generate request: {}...",
        truncate_str(&req.prompt, 50)
    );

    if req.stream {
        let stream = state.engine.stream_generate(req.prompt, options, &req.model).await?;
        return Ok(sse_response(stream, req.model).into_response());
    }

    let result = state.engine.generate(req.prompt, options, &req.model).await?;
    Ok(Json(GenerateResponse::from(result)).into_response())
}

fn sse_response(
    stream: CompletionStream,
    model: String,
) -> Sse<impl futures::Stream<Item = Result<Event, axum::Error>>> {
    let events = stream.map(move |item| match item {
        Ok(chunk) => Event::default().json_data(StreamedGenerateResponse::from_chunk(&model, chunk)),
        Err(err) => Ok(Event::default().event("error").data(err.to_string())),
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
