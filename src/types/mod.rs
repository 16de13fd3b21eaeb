//! Shared data types

pub mod completion;
pub mod message;
pub mod options;

pub use completion::{new_response_id, CompletionChunk, CompletionResult, Usage};
pub use message::{Message, Role};
pub use options::{GenerationOptions, OptionsError, OptionsPayload};
