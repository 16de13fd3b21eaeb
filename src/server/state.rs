//! Application state shared across handlers.

use std::sync::Arc;

use crate::inference::GenerationEngine;
use crate::types::GenerationOptions;

#[derive(Clone)]
pub struct AppState {
    /// Shared engine for inference.
    pub engine: Arc<GenerationEngine>,
    /// Used when a chat request carries no options
    pub default_options: GenerationOptions,
}

impl AppState {
    pub fn new(engine: Arc<GenerationEngine>) -> Self {
        Self {
            engine,
            default_options: GenerationOptions::default(),
        }
    }

    pub fn with_default_options(mut self, options: GenerationOptions) -> Self {
        self.default_options = options;
        self
    }
}
