//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CompletionChunk, CompletionResult, Message, OptionsPayload};

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// Model used for the chat
    pub model: String,
    /// Chat history, oldest first
    pub messages: Vec<Message>,
    /// Generation options; server defaults apply when absent
    #[serde(default)]
    pub options: Option<OptionsPayload>,
    #[serde(default)]
    pub stream: bool,
}

/// Non-streaming reply
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub message: Message,
    pub done: bool,
    pub prompt_eval_count: u32,
    pub eval_count: u32,
}

impl From<CompletionResult> for ChatResponse {
    fn from(result: CompletionResult) -> Self {
        Self {
            id: result.id,
            model: result.model,
            created_at: result.created_at,
            message: result.message,
            done: true,
            prompt_eval_count: result.usage.prompt_tokens,
            eval_count: result.usage.completion_tokens,
        }
    }
}

/// One SSE event of a streamed reply
#[derive(Debug, Clone, Serialize)]
pub struct StreamedChatResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub done: bool,
}

impl StreamedChatResponse {
    pub fn from_chunk(id: &str, model: &str, chunk: CompletionChunk) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            content: chunk.content,
            done: chunk.done,
        }
    }
}

/// Body of `POST /api/generate`
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    /// Text the model continues, without a chat template
    pub prompt: String,
    /// Generation options; server defaults apply when absent
    #[serde(default)]
    pub options: Option<OptionsPayload>,
    #[serde(default)]
    pub stream: bool,
}

/// Non-streaming reply to `POST /api/generate`
#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub response: String,
    pub done: bool,
    pub prompt_eval_count: u32,
    pub eval_count: u32,
}

impl From<CompletionResult> for GenerateResponse {
    fn from(result: CompletionResult) -> Self {
        Self {
            model: result.model,
            created_at: result.created_at,
            response: result.message.content,
            done: true,
            prompt_eval_count: result.usage.prompt_tokens,
            eval_count: result.usage.completion_tokens,
        }
    }
}

/// One SSE event of a streamed `/api/generate` reply
#[derive(Debug, Clone, Serialize)]
pub struct StreamedGenerateResponse {
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub response: String,
    pub done: bool,
}

impl StreamedGenerateResponse {
    pub fn from_chunk(model: &str, chunk: CompletionChunk) -> Self {
        Self {
            model: model.to_string(),
            created_at: Utc::now(),
            response: chunk.content,
            done: chunk.done,
        }
    }
}

/// Body of `POST /complete`
#[derive(Debug, Clone, Deserialize)]
pub struct CodeCompletionRequest {
    pub prompt: String,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: i64,
}

fn default_max_new_tokens() -> i64 {
    100
}

/// Reply to `POST /complete`
#[derive(Debug, Clone, Serialize)]
pub struct CodeCompletionResponse {
    pub completion: String,
}

/// Body of the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_status: &'static str,
}
