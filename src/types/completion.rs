//! Completion results
//!
//! What the generation engine hands back: a whole message for blocking
//! requests, or ordered text chunks for streamed ones.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::message::Message;

/// Token counts for one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    /// Tokens in the prompt as fed to the model
    pub prompt_tokens: u32,
    /// Tokens sampled by the model
    pub completion_tokens: u32,
}

/// Result of a non-streaming completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    /// Opaque response id (`chatcmpl-<uuid>`)
    pub id: String,
    /// Model identifier echoed from the request
    pub model: String,
    /// The generated assistant message
    pub message: Message,
    pub created_at: DateTime<Utc>,
    pub usage: Usage,
}

impl CompletionResult {
    pub fn new(id: String, model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            model: model.into(),
            message: Message::assistant(content),
            created_at: Utc::now(),
            usage: Usage::default(),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// One incremental piece of a streamed completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionChunk {
    /// Text delta, never empty
    pub content: String,
    /// True on the last chunk of the stream
    pub done: bool,
}

impl CompletionChunk {
    pub fn partial(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
        }
    }

    pub fn terminal(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: true,
        }
    }
}

/// Generate a fresh response id
pub fn new_response_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::Role;

    #[test]
    fn test_result_wraps_assistant_message() {
        let result = CompletionResult::new(new_response_id(), "qwen", "fn main() {}");
        assert!(result.id.starts_with("chatcmpl-"));
        assert_eq!(result.model, "qwen");
        assert_eq!(result.message.role, Role::Assistant);
        assert_eq!(result.message.content, "fn main() {}");
        assert_eq!(result.usage, Usage::default());
    }

    #[test]
    fn test_result_carries_usage() {
        let usage = Usage {
            prompt_tokens: 12,
            completion_tokens: 3,
        };
        let result = CompletionResult::new(new_response_id(), "qwen", "x").with_usage(usage);
        assert_eq!(result.usage.prompt_tokens, 12);
        assert_eq!(result.usage.completion_tokens, 3);
    }

    #[test]
    fn test_response_ids_are_unique() {
        assert_ne!(new_response_id(), new_response_id());
    }
}
