//! Model provisioning
//!
//! Makes sure the model artifact sits at its deterministic local path before
//! the engine tries to load it, downloading it when missing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while provisioning the model artifact
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid model filename: {0:?}")]
    InvalidFilename(String),

    #[error("Model artifact missing at {0}")]
    Missing(PathBuf),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Download incomplete: got {got} bytes, expected {expected}")]
    Incomplete { got: u64, expected: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the model comes from and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
    pub models_dir: PathBuf,
}

impl ArtifactSpec {
    /// Local path of the artifact
    pub fn local_path(&self) -> Result<PathBuf, ProvisionError> {
        let safe = sanitize_local_filename(&self.filename)?;
        Ok(self.models_dir.join(safe))
    }
}

/// A remote store that can fetch an artifact to a local file
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Downloads `spec` to `dest`; `dest` only appears once complete
    async fn fetch(&self, spec: &ArtifactSpec, dest: &Path) -> Result<(), ProvisionError>;
}

/// Ensures the model artifact is present locally
#[derive(Clone)]
pub struct ModelProvisioner {
    spec: ArtifactSpec,
    source: Arc<dyn ArtifactSource>,
}

impl ModelProvisioner {
    pub fn new(spec: ArtifactSpec, source: Arc<dyn ArtifactSource>) -> Self {
        Self { spec, source }
    }

    /// Local path the model is expected at
    pub fn artifact_path(&self) -> Result<PathBuf, ProvisionError> {
        self.spec.local_path()
    }

    /// Returns true if the artifact is present after the call
    ///
    /// Never fails: problems are logged and reported as `false`.
    pub async fn ensure_present(&self) -> bool {
        match self.provision().await {
            Ok(path) => {
                tracing::info!("Model found: {}", path.display());
                true
            }
            Err(e) => {
                tracing::error!("Could not provision model {}: {}", self.spec.filename, e);
                false
            }
        }
    }

    async fn provision(&self) -> Result<PathBuf, ProvisionError> {
        let path = self.artifact_path()?;
        if is_present(&path).await {
            return Ok(path);
        }

        tracing::info!(
            "Model not found. Downloading {} from {}...",
            self.spec.filename,
            self.spec.repo_id
        );
        tokio::fs::create_dir_all(&self.spec.models_dir).await?;
        self.source.fetch(&self.spec, &path).await?;

        if is_present(&path).await {
            Ok(path)
        } else {
            Err(ProvisionError::Missing(path))
        }
    }
}

/// An existing, non-empty file counts as present
async fn is_present(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Turns a repository file path into a single safe file name
pub fn sanitize_local_filename(filename: &str) -> Result<String, ProvisionError> {
    let invalid = || ProvisionError::InvalidFilename(filename.to_string());

    let trimmed = filename.trim();
    let no_query = trimmed.split('?').next().unwrap_or(trimmed);
    let no_fragment = no_query.split('#').next().unwrap_or(no_query);
    let flattened = no_fragment
        .trim_start_matches('/')
        .replace('\\', "/")
        .replace('/', "__");

    let mut sanitized: String = flattened
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.' || c == '_') {
        return Err(invalid());
    }

    Ok(sanitized)
}
