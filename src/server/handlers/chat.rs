//! Chat completion handler.

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
use crate::server::models::{ChatRequest, ChatResponse, StreamedChatResponse};
use crate::server::state::AppState;
use crate::truncate_str;

/// Handle chat requests (streaming and non-streaming).
///
/// Both paths wait for the engine's single ticket. A streamed response owns
/// its ticket through the body, so when the client disconnects the body is
/// dropped and the next queued request proceeds.
pub async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if req.messages.is_empty() {
        return Err(ApiError::InvalidRequest("messages must not be empty".to_string()));
    }
    let options = request_options(&state, req.options)?;

    let last = req.messages.last().map(|m| m.content.as_str()).unwrap_or_default();
    tracing::debug!(
        model = %req.model,
        messages = req.messages.len(),
        stream = req.stream,
        keep_alive = options.keep_alive(),
        "Chat request: {}...",
        truncate_str(last, 50)
    );

    if req.stream {
        let stream = state.engine.stream(req.messages, options, &req.model).await?;
        return Ok(sse_response(stream, req.model).into_response());
    }

    let result = state.engine.complete(req.messages, options, &req.model).await?;
    Ok(Json(ChatResponse::from(result)).into_response())
}

/// Wraps a completion stream as server-sent events, one event per chunk
fn sse_response(
    stream: CompletionStream,
    model: String,
) -> Sse<impl futures::Stream<Item = Result<Event, axum::Error>>> {
    let id = stream.id().to_string();
    let events = stream.map(move |item| match item {
        Ok(chunk) => Event::default().json_data(StreamedChatResponse::from_chunk(&id, &model, chunk)),
        // Headers are already sent; report in-band and let the stream end
        Err(err) => Ok(Event::default().event("error").data(err.to_string())),
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
