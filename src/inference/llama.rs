//! llama.cpp model resource
//!
//! # Architecture
//!
//! Since llama-cpp-2 types (`LlamaBackend`, `LlamaModel`, `LlamaContext`) contain
//! raw pointers that are not `Send`, the backend and model live on one dedicated
//! inference thread for their whole life. [`LlamaResource`] talks to it over a
//! command channel, and every generation becomes a command executed in turn.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;

use crate::inference::model::validate_gguf;
use crate::inference::resource::{
    Delta, DeltaSink, Generation, GenerationError, GenerationRequest, LoadError, ModelLoader,
    ModelResource, Prompt,
};
use crate::inference::streaming::{take_utf8, StopMatcher, StopScan};
use crate::types::{Message, Role, Usage};

const TOP_K: i32 = 40;
const TOP_P: f32 = 0.95;

/// Commands sent to the inference thread
enum WorkerCommand {
    Generate {
        request: GenerationRequest,
        event_tx: Sender<WorkerEvent>,
        stop_signal: Arc<AtomicBool>,
    },
    Shutdown,
}

/// What the inference thread reports back for one generation
enum WorkerEvent {
    Delta(Delta),
    Finished(Usage),
    Failed(GenerationError),
}

/// Loads GGUF models with llama.cpp
#[derive(Debug, Clone)]
pub struct LlamaLoader {
    /// Number of layers to offload to GPU (0 = CPU only, high value = all to GPU)
    pub gpu_layers: u32,
}

impl ModelLoader for LlamaLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn ModelResource>, LoadError> {
        Ok(Arc::new(LlamaResource::spawn(path, self.gpu_layers)?))
    }
}

/// A model loaded on its own inference thread
pub struct LlamaResource {
    command_tx: Sender<WorkerCommand>,
    worker_handle: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl LlamaResource {
    /// Validates the artifact, starts the inference thread and loads the model on it
    ///
    /// Blocks until loading finishes.
    pub fn spawn(path: &Path, gpu_layers: u32) -> Result<Self, LoadError> {
        let header = validate_gguf(path)?;
        tracing::debug!("GGUF v{} validation passed for {:?}", header.version, path);

        let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker_path = path.to_path_buf();

        let handle = thread::Builder::new()
            .name("llama-inference".to_string())
            .spawn(move || worker_thread_main(worker_path, gpu_layers, ready_tx, command_rx))
            .map_err(|e| LoadError::Worker(e.to_string()))?;

        let loaded = ready_rx
            .recv()
            .map_err(|e| LoadError::Worker(e.to_string()))
            .and_then(|result| result);

        match loaded {
            Ok(()) => Ok(Self {
                command_tx,
                worker_handle: Some(handle),
                path: path.to_path_buf(),
            }),
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    /// Sends one generation to the inference thread and relays its deltas
    ///
    /// Returns the token counts once the thread reports the end. A `Break`
    /// from `sink` abandons the generation and reports nothing.
    fn drive(&self, request: &GenerationRequest, sink: &mut DeltaSink<'_>) -> Result<Usage, GenerationError> {
        let (event_tx, event_rx) = mpsc::channel();
        let stop_signal = Arc::new(AtomicBool::new(false));

        self.command_tx
            .send(WorkerCommand::Generate {
                request: request.clone(),
                event_tx,
                stop_signal: stop_signal.clone(),
            })
            .map_err(|_| GenerationError::new("inference thread is gone"))?;

        loop {
            match event_rx.recv() {
                Ok(WorkerEvent::Delta(delta)) => {
                    if sink(delta).is_break() {
                        // Dropping the receiver also stops the loop at its next send
                        stop_signal.store(true, Ordering::Relaxed);
                        return Ok(Usage::default());
                    }
                }
                Ok(WorkerEvent::Finished(usage)) => return Ok(usage),
                Ok(WorkerEvent::Failed(e)) => return Err(e),
                Err(_) => return Err(GenerationError::new("inference thread exited mid-generation")),
            }
        }
    }
}

impl ModelResource for LlamaResource {
    fn complete(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let mut text = String::new();
        let usage = self.drive(request, &mut |delta: Delta| {
            if let Some(content) = delta.content {
                text.push_str(&content);
            }
            ControlFlow::Continue(())
        })?;
        Ok(Generation::new(text, usage))
    }

    fn stream(&self, request: &GenerationRequest, sink: &mut DeltaSink<'_>) -> Result<(), GenerationError> {
        self.drive(request, sink).map(|_| ())
    }
}

impl Drop for LlamaResource {
    fn drop(&mut self) {
        // Send shutdown command
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
        // Wait for worker thread to finish
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
        tracing::info!("Model unloaded: {}", self.path.display());
    }
}

/// Inference thread main loop
///
/// Owns the LlamaBackend and LlamaModel and runs generations one at a time.
fn worker_thread_main(
    path: PathBuf,
    gpu_layers: u32,
    ready_tx: Sender<Result<(), LoadError>>,
    command_rx: Receiver<WorkerCommand>,
) {
    let (backend, model) = match load_model(&path, gpu_layers) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Failed to load model: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    log_model_info(&model, &path);
    if ready_tx.send(Ok(())).is_err() {
        return;
    }

    loop {
        match command_rx.recv() {
            Ok(WorkerCommand::Generate {
                request,
                event_tx,
                stop_signal,
            }) => {
                let terminal = match run_generation(&backend, &model, &request, &event_tx, &stop_signal) {
                    Ok(usage) => WorkerEvent::Finished(usage),
                    Err(e) => WorkerEvent::Failed(GenerationError(e)),
                };
                let _ = event_tx.send(terminal);
            }
            Ok(WorkerCommand::Shutdown) => {
                tracing::info!("Inference thread shutting down");
                break;
            }
            Err(_) => {
                // Channel closed, exit
                tracing::debug!("Command channel closed, inference thread exiting");
                break;
            }
        }
    }
}

fn load_model(path: &Path, gpu_layers: u32) -> Result<(LlamaBackend, LlamaModel), LoadError> {
    let backend = LlamaBackend::init().map_err(|e| LoadError::Backend(e.to_string()))?;
    tracing::info!("LlamaBackend initialized in inference thread");

    let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
    let model = LlamaModel::load_from_file(&backend, path, &model_params)
        .map_err(|e| LoadError::Model(e.to_string()))?;

    Ok((backend, model))
}

fn log_model_info(model: &LlamaModel, path: &Path) {
    tracing::info!(
        "Model loaded: {} ({} params, {} vocab, {} embd, {} ctx, {} MB)",
        path.display(),
        model.n_params(),
        model.n_vocab(),
        model.n_embd(),
        model.n_ctx_train(),
        model.size() / 1024 / 1024
    );
}

/// Run text generation (called from the inference thread)
fn run_generation(
    backend: &LlamaBackend,
    model: &LlamaModel,
    request: &GenerationRequest,
    tx: &Sender<WorkerEvent>,
    stop_signal: &AtomicBool,
) -> Result<Usage, String> {
    let prompt = match &request.prompt {
        Prompt::Chat(messages) => match build_chat_prompt(model, messages) {
            Ok(chat_prompt) => chat_prompt,
            Err(error) => {
                tracing::warn!("Chat template not applied: {error}");
                plain_prompt(messages)
            }
        },
        Prompt::Raw(text) => text.clone(),
    };

    let options = &request.options;
    let n_ctx = std::cmp::min(options.num_ctx(), model.n_ctx_train());

    let tokens = model
        .str_to_token(&prompt, AddBos::Always)
        .map_err(|e| format!("Failed to tokenize: {}", e))?;
    tracing::debug!("Tokenized prompt into {} tokens", tokens.len());

    if tokens.len() >= n_ctx as usize {
        return Err(format!(
            "Prompt of {} tokens does not fit a context window of {}",
            tokens.len(),
            n_ctx
        ));
    }

    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(n_ctx))
        .with_n_batch(n_ctx);

    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| format!("Failed to create context: {}", e))?;

    // Opening delta announces the role, like chat-completion streams do
    if tx.send(WorkerEvent::Delta(Delta::role(Role::Assistant))).is_err() {
        return Ok(Usage::default());
    }

    run_inference(&mut ctx, model, tokens, request, tx, stop_signal)
}

fn build_chat_prompt(model: &LlamaModel, messages: &[Message]) -> Result<String, String> {
    let template = model
        .chat_template(None)
        .map_err(|e| format!("Failed to load chat template: {e}"))?;
    let chat = messages
        .iter()
        .map(|m| LlamaChatMessage::new(m.role.as_str().to_string(), m.content.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Failed to build chat message: {e}"))?;
    model
        .apply_chat_template(&template, &chat, true)
        .map_err(|e| format!("Failed to apply chat template: {e}"))
}

/// Fallback for models shipped without a chat template
fn plain_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str(message.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str("assistant: ");
    prompt
}

/// Runs the inference loop
fn run_inference(
    ctx: &mut LlamaContext,
    model: &LlamaModel,
    prompt_tokens: Vec<LlamaToken>,
    request: &GenerationRequest,
    tx: &Sender<WorkerEvent>,
    stop_signal: &AtomicBool,
) -> Result<Usage, String> {
    let options = &request.options;
    let mut usage = Usage {
        prompt_tokens: prompt_tokens.len() as u32,
        completion_tokens: 0,
    };

    // Create batch and add prompt tokens
    let mut batch = LlamaBatch::new(prompt_tokens.len().max(512), 1);

    let last_index = prompt_tokens.len().saturating_sub(1);
    for (i, token) in prompt_tokens.iter().enumerate() {
        batch
            .add(*token, i as i32, &[0], i == last_index)
            .map_err(|e| format!("Failed to add token to batch: {}", e))?;
    }

    // Process prompt
    ctx.decode(&mut batch)
        .map_err(|e| format!("Failed to decode prompt: {}", e))?;

    let mut sampler = if options.temperature() < 0.01 {
        // Use greedy sampling for very low temperature
        LlamaSampler::greedy()
    } else {
        LlamaSampler::chain_simple([
            LlamaSampler::top_k(TOP_K),
            LlamaSampler::top_p(TOP_P, 1),
            LlamaSampler::temp(options.temperature()),
            LlamaSampler::dist(rand_seed()),
        ])
    };

    let mut stops = StopMatcher::new(options.stop());
    let mut n_decoded = prompt_tokens.len() as i32;

    // Buffer for handling incomplete UTF-8 sequences
    let mut utf8_buffer: Vec<u8> = Vec::new();

    let budget = token_budget(options.num_predict(), ctx.n_ctx(), prompt_tokens.len());
    if budget < options.num_predict() {
        tracing::debug!("Context window leaves room for {} of {} tokens", budget, options.num_predict());
    }

    for _ in 0..budget {
        if stop_signal.load(Ordering::Relaxed) {
            tracing::debug!("Generation stopped by consumer");
            return Ok(usage);
        }

        let new_token = sampler.sample(ctx, batch.n_tokens() - 1);
        sampler.accept(new_token);
        usage.completion_tokens += 1;

        if model.is_eog_token(new_token) {
            tracing::debug!("End of generation token encountered");
            break;
        }

        let token_bytes = model
            .token_to_bytes(new_token, Special::Tokenize)
            .map_err(|e| format!("Failed to convert token to bytes: {}", e))?;
        utf8_buffer.extend_from_slice(&token_bytes);

        let fragment = take_utf8(&mut utf8_buffer);
        match stops.push(&fragment) {
            StopScan::Continue(text) => {
                if !emit(tx, text) {
                    tracing::debug!("Receiver dropped, stopping generation");
                    return Ok(usage);
                }
            }
            StopScan::Stop(text) => {
                tracing::debug!("Stop sequence matched");
                emit(tx, text);
                return Ok(usage);
            }
        }

        // Prepare batch for next iteration
        batch.clear();
        batch
            .add(new_token, n_decoded, &[0], true)
            .map_err(|e| format!("Failed to add token to batch: {}", e))?;

        ctx.decode(&mut batch)
            .map_err(|e| format!("Failed to decode: {}", e))?;

        n_decoded += 1;
    }

    // Flush whatever the UTF-8 buffer and the stop matcher still hold
    let tail = String::from_utf8_lossy(&utf8_buffer).into_owned();
    let tail = match stops.push(&tail) {
        StopScan::Continue(text) => text + &stops.finish(),
        StopScan::Stop(text) => text,
    };
    emit(tx, tail);

    Ok(usage)
}

/// Tokens that may still be generated: `num_predict`, cut to the room the
/// prompt leaves in the context window
fn token_budget(num_predict: u32, n_ctx: u32, prompt_len: usize) -> u32 {
    let room = (n_ctx as usize).saturating_sub(prompt_len);
    num_predict.min(u32::try_from(room).unwrap_or(u32::MAX))
}

/// Sends non-empty text; returns false once the receiver is gone
fn emit(tx: &Sender<WorkerEvent>, text: String) -> bool {
    if text.is_empty() {
        return true;
    }
    tx.send(WorkerEvent::Delta(Delta::text(text))).is_ok()
}

/// Generates a random seed using system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}
