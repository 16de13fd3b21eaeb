//! Generation engine
//!
//! Owns the loaded model and serializes access to it.
//!
//! # Architecture
//!
//! Any number of requests may call [`GenerationEngine::complete`],
//! [`GenerationEngine::stream`] or their raw-prompt variants at once, but each
//! must first take the single [`Ticket`], and holds it for as long as its call
//! into the model runs. The model itself always runs on a blocking worker so
//! the async side keeps accepting requests while inference is in progress.
//!
//! Lifecycle transitions (`Unloaded -> Loading -> Ready -> Unloading -> Unloaded`)
//! are crate-private and driven by the lifecycle controller.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use thiserror::Error;

use crate::inference::bridge::{spawn_stream, CompletionStream};
use crate::inference::resource::{GenerationError, GenerationRequest, ModelResource, Prompt};
use crate::inference::state::EngineState;
use crate::inference::ticket::{SingleFlight, Ticket};
use crate::types::{new_response_id, CompletionResult, GenerationOptions, Message};

/// Errors surfaced by the generation engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine not ready (model is {0})")]
    NotReady(EngineState),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("stream abandoned by consumer")]
    StreamAbandoned,

    #[error("invalid engine transition from {from} to {to}")]
    InvalidTransition { from: EngineState, to: EngineState },
}

/// State and model handle, swapped together so readers never see one without the other
struct Slot {
    state: EngineState,
    resource: Option<Arc<dyn ModelResource>>,
    model_path: Option<PathBuf>,
}

/// Serializes chat generations onto one loaded model
pub struct GenerationEngine {
    slot: RwLock<Slot>,
    flight: SingleFlight,
}

impl GenerationEngine {
    /// Creates an engine with no model loaded
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                state: EngineState::Unloaded,
                resource: None,
                model_path: None,
            }),
            flight: SingleFlight::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.read_slot().state
    }

    /// Artifact the current model was loaded from, while one is held
    pub fn model_path(&self) -> Option<PathBuf> {
        self.read_slot().model_path.clone()
    }

    /// Returns true if requests are currently accepted
    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Runs a full chat generation and returns the assistant's reply
    pub async fn complete(
        &self,
        history: Vec<Message>,
        options: GenerationOptions,
        model_id: &str,
    ) -> Result<CompletionResult, EngineError> {
        self.run(Prompt::Chat(history), options, model_id).await
    }

    /// Continues `prompt` as is, without the chat template
    pub async fn generate(
        &self,
        prompt: String,
        options: GenerationOptions,
        model_id: &str,
    ) -> Result<CompletionResult, EngineError> {
        self.run(Prompt::Raw(prompt), options, model_id).await
    }

    /// Starts a streamed chat generation
    ///
    /// The returned stream keeps the ticket until it is drained or dropped.
    pub async fn stream(
        &self,
        history: Vec<Message>,
        options: GenerationOptions,
        model_id: &str,
    ) -> Result<CompletionStream, EngineError> {
        self.open_stream(Prompt::Chat(history), options, model_id).await
    }

    /// Streamed form of [`GenerationEngine::generate`]
    pub async fn stream_generate(
        &self,
        prompt: String,
        options: GenerationOptions,
        model_id: &str,
    ) -> Result<CompletionStream, EngineError> {
        self.open_stream(Prompt::Raw(prompt), options, model_id).await
    }

    async fn run(
        &self,
        prompt: Prompt,
        options: GenerationOptions,
        model_id: &str,
    ) -> Result<CompletionResult, EngineError> {
        let (ticket, resource) = self.acquire().await?;
        let request = GenerationRequest {
            prompt,
            options,
            model_id: model_id.to_string(),
        };

        tracing::debug!(model = model_id, "Running completion");
        // The worker owns the ticket: it is released when the model returns,
        // even if this future is dropped first
        let outcome = tokio::task::spawn_blocking(move || {
            let result = resource.complete(&request);
            tracing::debug!("Completion finished after {:?}", ticket.held_for());
            drop(ticket);
            result
        })
        .await;

        let generation = match outcome {
            Ok(result) => result?,
            Err(join_err) => {
                tracing::error!("Generation worker panicked: {}", join_err);
                return Err(GenerationError::new("generation worker panicked").into());
            }
        };

        Ok(CompletionResult::new(new_response_id(), model_id, generation.text).with_usage(generation.usage))
    }

    async fn open_stream(
        &self,
        prompt: Prompt,
        options: GenerationOptions,
        model_id: &str,
    ) -> Result<CompletionStream, EngineError> {
        let (ticket, resource) = self.acquire().await?;
        let request = GenerationRequest {
            prompt,
            options,
            model_id: model_id.to_string(),
        };

        let id = new_response_id();
        tracing::debug!(id = %id, model = model_id, "Starting stream");
        Ok(spawn_stream(resource, request, ticket, id))
    }

    /// Takes the ticket, re-checking readiness once it is granted
    ///
    /// A caller queued before shutdown began gets the ticket after the state
    /// has left `Ready`; it hands it straight back and reports not-ready.
    async fn acquire(&self) -> Result<(Ticket, Arc<dyn ModelResource>), EngineError> {
        self.ready_resource()?;
        let ticket = self.flight.acquire().await;
        let resource = self.ready_resource()?;
        Ok((ticket, resource))
    }

    fn ready_resource(&self) -> Result<Arc<dyn ModelResource>, EngineError> {
        let slot = self.read_slot();
        match (&slot.state, &slot.resource) {
            (EngineState::Ready, Some(resource)) => Ok(resource.clone()),
            _ => Err(EngineError::NotReady(slot.state)),
        }
    }

    pub(crate) fn begin_loading(&self) -> Result<(), EngineError> {
        self.transition(EngineState::Loading).map(|_| ())
    }

    pub(crate) fn finish_loading(&self, resource: Arc<dyn ModelResource>, path: &Path) -> Result<(), EngineError> {
        let mut slot = self.write_slot();
        check_transition(slot.state, EngineState::Ready)?;
        slot.state = EngineState::Ready;
        slot.resource = Some(resource);
        slot.model_path = Some(path.to_path_buf());
        tracing::info!("Engine state: loading -> ready");
        Ok(())
    }

    pub(crate) fn abort_loading(&self) -> Result<(), EngineError> {
        self.transition(EngineState::Unloaded).map(|_| ())
    }

    pub(crate) fn begin_unloading(&self) -> Result<(), EngineError> {
        let mut slot = self.write_slot();
        check_transition(slot.state, EngineState::Unloading)?;
        slot.state = EngineState::Unloading;
        tracing::info!("Engine state: ready -> unloading");
        Ok(())
    }

    /// Waits for the current ticket holder, bounded by `timeout`
    pub(crate) async fn drain(&self, timeout: Duration) -> bool {
        self.flight.wait_idle(timeout).await
    }

    /// Moves to `Unloaded`, handing back the model so the caller decides where it is dropped
    pub(crate) fn finish_unloading(&self) -> Result<Option<Arc<dyn ModelResource>>, EngineError> {
        self.transition(EngineState::Unloaded)
    }

    /// Moves to a state that holds no model, returning whatever model was held
    fn transition(&self, to: EngineState) -> Result<Option<Arc<dyn ModelResource>>, EngineError> {
        let mut slot = self.write_slot();
        let from = slot.state;
        check_transition(from, to)?;
        slot.state = to;
        slot.model_path = None;
        tracing::info!("Engine state: {} -> {}", from, to);
        Ok(slot.resource.take())
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for GenerationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn check_transition(from: EngineState, to: EngineState) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}
