//! Model resource abstraction
//!
//! The generation engine drives the loaded model only through these traits.
//! Both calls block the calling thread for the whole generation, so the engine
//! always invokes them from a blocking worker, never from an async task.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::inference::model::ModelError;
use crate::types::{GenerationOptions, Message, Role, Usage};

/// Failure reported by the model while generating
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("generation failed: {0}")]
pub struct GenerationError(pub String);

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure while turning an artifact on disk into a [`ModelResource`]
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model validation failed: {0}")]
    Validation(#[from] ModelError),

    #[error("failed to initialize backend: {0}")]
    Backend(String),

    #[error("failed to load model: {0}")]
    Model(String),

    #[error("inference thread error: {0}")]
    Worker(String),
}

/// What the model is asked to continue
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// Chat history, rendered through the model's chat template
    Chat(Vec<Message>),
    /// Text fed to the model as is
    Raw(String),
}

/// Everything a model needs to answer one request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: Prompt,
    pub options: GenerationOptions,
    pub model_id: String,
}

/// Output of a full (non-streamed) generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub usage: Usage,
}

impl Generation {
    pub fn new(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// One increment produced by the model in streaming mode
///
/// Mirrors the shape of chat-completion deltas: the first delta usually only
/// announces the assistant role and carries no text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub role: Option<Role>,
    pub content: Option<String>,
}

impl Delta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            role: None,
            content: Some(content.into()),
        }
    }

    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            content: None,
        }
    }

    /// Consumes the delta, returning its text if there is any
    pub fn into_text(self) -> Option<String> {
        self.content.filter(|c| !c.is_empty())
    }
}

/// Callback receiving deltas; returning `Break` asks the model to stop early
pub type DeltaSink<'a> = dyn FnMut(Delta) -> ControlFlow<()> + 'a;

/// A loaded model that can run generations
pub trait ModelResource: Send + Sync {
    /// Runs a full generation and returns the produced text
    fn complete(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;

    /// Runs an incremental generation, pushing each delta into `sink` in order
    ///
    /// Implementations must return soon after `sink` answers `Break`.
    fn stream(&self, request: &GenerationRequest, sink: &mut DeltaSink<'_>) -> Result<(), GenerationError>;
}

/// Builds a [`ModelResource`] from a model artifact
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn ModelResource>, LoadError>;
}
