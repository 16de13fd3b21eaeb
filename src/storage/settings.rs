//! Settings storage
//!
//! Server configuration read from `settings.json` in the data directory (or
//! an explicit path). Missing fields take their defaults.

use crate::lifecycle::MissingModelPolicy;
use crate::storage::{default_models_dir, get_data_dir, StorageError};
use crate::types::{GenerationOptions, OptionsPayload};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REPO_ID: &str = "Qwen/Qwen2.5-Coder-1.5B-Instruct-GGUF";
pub const DEFAULT_FILENAME: &str = "qwen2.5-coder-1.5b-instruct-q4_k_m.gguf";
pub const DEFAULT_PORT: u16 = 11434;
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind
    pub host: String,
    pub port: u16,
    /// Hugging Face repository holding the model
    pub repo_id: String,
    /// Model file inside the repository
    pub filename: String,
    /// Branch, tag or commit to download from
    pub revision: String,
    /// Directory where model files (.gguf) are stored
    pub models_directory: PathBuf,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// What to do when the model cannot be provisioned at startup
    pub missing_model_policy: MissingModelPolicy,
    /// How long shutdown waits for an in-flight generation
    pub drain_timeout_secs: u64,
    /// Options applied to chat requests that send none
    pub default_options: OptionsPayload,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            repo_id: DEFAULT_REPO_ID.to_string(),
            filename: DEFAULT_FILENAME.to_string(),
            revision: "main".to_string(),
            models_directory: default_models_dir(),
            gpu_layers: 99, // Offload all layers to GPU by default
            missing_model_policy: MissingModelPolicy::Degrade,
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
            default_options: OptionsPayload::default(),
        }
    }
}

impl ServerSettings {
    /// Validate settings values
    ///
    /// Replaces unusable values with their defaults
    pub fn validate(&mut self) {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }

        if self.host.trim().is_empty() {
            self.host = "0.0.0.0".to_string();
        }

        if self.repo_id.trim().is_empty() {
            self.repo_id = DEFAULT_REPO_ID.to_string();
        }

        if self.filename.trim().is_empty() {
            self.filename = DEFAULT_FILENAME.to_string();
        }

        if self.revision.trim().is_empty() {
            self.revision = "main".to_string();
        }

        if self.drain_timeout_secs == 0 {
            self.drain_timeout_secs = DEFAULT_DRAIN_TIMEOUT_SECS;
        }

        if let Err(e) = GenerationOptions::try_from(self.default_options.clone()) {
            tracing::warn!("Invalid default options ({}), using built-in defaults", e);
            self.default_options = OptionsPayload::default();
        }
    }

    /// Validated form of `default_options`
    pub fn generation_defaults(&self) -> GenerationOptions {
        GenerationOptions::try_from(self.default_options.clone()).unwrap_or_default()
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// `host:port` as given, for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Get the default settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings(path: Option<&Path>) -> ServerSettings {
    match load_settings_internal(path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            ServerSettings::default()
        }
    }
}

/// Internal settings loading with error propagation
fn load_settings_internal(path: Option<&Path>) -> Result<ServerSettings, StorageError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => get_settings_path()?,
    };

    if !path.exists() {
        tracing::info!("Settings file {} not found, using defaults", path.display());
        return Ok(ServerSettings::default());
    }

    let json = fs::read_to_string(&path)?;
    let mut settings: ServerSettings = serde_json::from_str(&json)?;

    // Validate loaded settings
    settings.validate();

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}
