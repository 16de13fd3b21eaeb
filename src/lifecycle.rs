//! Engine lifecycle
//!
//! Drives provisioning, loading, draining and unloading of the model, tied to
//! process start and shutdown.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::{EngineError, GenerationEngine, LoadError, ModelLoader};
use crate::storage::provisioner::{ModelProvisioner, ProvisionError};

/// What startup does when the model artifact cannot be provisioned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingModelPolicy {
    /// Keep serving; health reports 503 and every request gets not-ready
    #[default]
    Degrade,
    /// Abort startup
    FailFast,
}

/// Fatal startup failures
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("model loader panicked")]
    LoaderPanicked,
}

/// Owns the engine's state transitions
pub struct LifecycleController {
    engine: Arc<GenerationEngine>,
    provisioner: ModelProvisioner,
    loader: Arc<dyn ModelLoader>,
    policy: MissingModelPolicy,
    drain_timeout: Duration,
}

impl LifecycleController {
    pub fn new(
        engine: Arc<GenerationEngine>,
        provisioner: ModelProvisioner,
        loader: Arc<dyn ModelLoader>,
        policy: MissingModelPolicy,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            provisioner,
            loader,
            policy,
            drain_timeout,
        }
    }

    pub fn engine(&self) -> &Arc<GenerationEngine> {
        &self.engine
    }

    /// Provisions and loads the model
    ///
    /// A missing artifact is fatal only under [`MissingModelPolicy::FailFast`];
    /// a present artifact that fails to load is always fatal.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        if !self.provisioner.ensure_present().await {
            let path = self.provisioner.artifact_path()?;
            return match self.policy {
                MissingModelPolicy::Degrade => {
                    tracing::warn!("Model unavailable, serving without it: {}", path.display());
                    Ok(())
                }
                MissingModelPolicy::FailFast => Err(ProvisionError::Missing(path).into()),
            };
        }

        let path = self.provisioner.artifact_path()?;
        self.engine.begin_loading()?;

        let loader = self.loader.clone();
        let load_path = path.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&load_path)).await;

        match loaded {
            Ok(Ok(resource)) => {
                self.engine.finish_loading(resource, &path)?;
                tracing::info!("Model ready: {}", path.display());
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("Fatal Error: Failed to initialize model engine: {}", e);
                self.engine.abort_loading()?;
                Err(e.into())
            }
            Err(join_err) => {
                tracing::error!("Fatal Error: model loader panicked: {}", join_err);
                self.engine.abort_loading()?;
                Err(LifecycleError::LoaderPanicked)
            }
        }
    }

    /// Stops taking work, waits for the in-flight generation, then unloads
    ///
    /// Does nothing unless the engine is ready. If the drain times out the
    /// model handle is still released here; the orphaned worker keeps its own
    /// reference and the model is freed when it finishes.
    pub async fn shutdown(&self) {
        if let Err(e) = self.engine.begin_unloading() {
            tracing::debug!("Nothing to unload: {}", e);
            return;
        }

        if !self.engine.drain(self.drain_timeout).await {
            tracing::warn!(
                "In-flight generation still running after {:?}, unloading anyway",
                self.drain_timeout
            );
        }

        match self.engine.finish_unloading() {
            Ok(Some(resource)) => {
                // Releasing a model may join its inference thread
                if let Err(e) = tokio::task::spawn_blocking(move || drop(resource)).await {
                    tracing::error!("Model release panicked: {}", e);
                }
                tracing::info!("Engine successfully unloaded and memory freed.");
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Unload failed: {}", e),
        }
    }
}
