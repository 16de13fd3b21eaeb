#![allow(dead_code)]

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use localm_server::inference::{
    Delta, DeltaSink, Generation, GenerationEngine, GenerationError, GenerationRequest, LoadError,
    ModelLoader, ModelResource, Prompt,
};
use localm_server::lifecycle::{LifecycleController, MissingModelPolicy};
use localm_server::storage::provisioner::{ArtifactSource, ArtifactSpec, ModelProvisioner, ProvisionError};
use localm_server::types::{Role, Usage};
use tempfile::TempDir;

/// One recorded call into the model
#[derive(Debug, Clone)]
pub struct Call {
    pub model_id: String,
    pub entered: Instant,
    pub exited: Instant,
}

/// Fake model that replays a script of text pieces and records every call
pub struct ScriptedModel {
    pub pieces: Vec<String>,
    pub per_piece: Duration,
    pub fail_on: Option<String>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedModel {
    pub fn new(pieces: &[&str], per_piece: Duration) -> Self {
        Self {
            pieces: pieces.iter().map(|s| s.to_string()).collect(),
            per_piece,
            fail_on: None,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Instant {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        Instant::now()
    }

    fn exit(&self, request: &GenerationRequest, entered: Instant) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(Call {
            model_id: request.model_id.clone(),
            entered,
            exited: Instant::now(),
        });
    }

    fn check(&self, request: &GenerationRequest) -> Result<(), GenerationError> {
        match (&self.fail_on, last_text(request)) {
            (Some(trigger), Some(content)) if trigger == content => Err(GenerationError::new("scripted failure")),
            _ => Ok(()),
        }
    }
}

/// The user's last turn, or the raw prompt
pub fn last_text(request: &GenerationRequest) -> Option<&str> {
    match &request.prompt {
        Prompt::Chat(history) => history.last().map(|m| m.content.as_str()),
        Prompt::Raw(text) => Some(text.as_str()),
    }
}

impl ModelResource for ScriptedModel {
    fn complete(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let entered = self.enter();
        std::thread::sleep(self.per_piece * self.pieces.len() as u32);
        let usage = Usage {
            prompt_tokens: last_text(request).map_or(0, |t| t.split_whitespace().count() as u32),
            completion_tokens: self.pieces.len() as u32,
        };
        let result = self
            .check(request)
            .map(|_| Generation::new(self.pieces.concat(), usage));
        self.exit(request, entered);
        result
    }

    fn stream(&self, request: &GenerationRequest, sink: &mut DeltaSink<'_>) -> Result<(), GenerationError> {
        let entered = self.enter();
        let mut result = self.check(request);
        if result.is_ok() {
            let _ = sink(Delta::role(Role::Assistant));
            for piece in &self.pieces {
                std::thread::sleep(self.per_piece);
                if let ControlFlow::Break(()) = sink(Delta::text(piece.clone())) {
                    break;
                }
            }
            if self.fail_on.as_deref() == Some("mid-stream") {
                result = Err(GenerationError::new("scripted failure"));
            }
        }
        self.exit(request, entered);
        result
    }
}

/// Hands out `model`, after `delay` spent "loading"
pub struct SlowLoader {
    pub model: Arc<ScriptedModel>,
    pub delay: Duration,
}

impl ModelLoader for SlowLoader {
    fn load(&self, _path: &Path) -> Result<Arc<dyn ModelResource>, LoadError> {
        std::thread::sleep(self.delay);
        Ok(self.model.clone())
    }
}

struct Offline;

#[async_trait]
impl ArtifactSource for Offline {
    async fn fetch(&self, _spec: &ArtifactSpec, _dest: &Path) -> Result<(), ProvisionError> {
        Err(ProvisionError::Download("offline".into()))
    }
}

/// A controller wired to `model`, with or without an artifact on disk
pub fn controller(dir: &TempDir, model: Arc<ScriptedModel>, with_artifact: bool) -> LifecycleController {
    let loader = SlowLoader {
        model,
        delay: Duration::ZERO,
    };
    controller_with_loader(dir, Arc::new(loader), with_artifact)
}

/// A controller using `loader`, with or without an artifact on disk
pub fn controller_with_loader(
    dir: &TempDir,
    loader: Arc<dyn ModelLoader>,
    with_artifact: bool,
) -> LifecycleController {
    if with_artifact {
        std::fs::write(dir.path().join("model.gguf"), b"weights").unwrap();
    }
    let spec = ArtifactSpec {
        repo_id: "org/repo".into(),
        filename: "model.gguf".into(),
        revision: "main".into(),
        models_dir: dir.path().to_path_buf(),
    };
    LifecycleController::new(
        Arc::new(GenerationEngine::new()),
        ModelProvisioner::new(spec, Arc::new(Offline)),
        loader,
        MissingModelPolicy::Degrade,
        Duration::from_secs(5),
    )
}

/// A started controller whose engine is ready
pub async fn ready(dir: &TempDir, model: Arc<ScriptedModel>) -> LifecycleController {
    let controller = controller(dir, model, true);
    controller.start().await.unwrap();
    assert!(controller.engine().is_ready());
    controller
}
