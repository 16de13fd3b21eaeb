//! LLM inference
//!
//! The generation engine, the bridge that streams its output, and the
//! llama-cpp model resource behind it.

pub mod bridge;
pub mod engine;
pub mod llama;
pub mod model;
pub mod resource;
pub mod state;
pub mod streaming;
pub mod ticket;

// Re-export main types for convenience
pub use bridge::CompletionStream;
pub use engine::{EngineError, GenerationEngine};
pub use llama::{LlamaLoader, LlamaResource};
pub use model::{validate_gguf, GgufHeader, ModelError, GGUF_MAGIC};
pub use resource::{
    Delta, DeltaSink, Generation, GenerationError, GenerationRequest, LoadError, ModelLoader,
    ModelResource, Prompt,
};
pub use state::EngineState;
pub use streaming::StreamToken;
pub use ticket::{SingleFlight, Ticket};
