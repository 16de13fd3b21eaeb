//! Persistent storage
//!
//! Settings on disk and the model artifact cache.

use std::path::PathBuf;
use thiserror::Error;

pub mod huggingface;
pub mod provisioner;
pub mod settings;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access data directory: {0}")]
    DataDirError(String),
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to serialize/deserialize JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Get the application data directory
///
/// Returns the platform-specific application data directory:
/// - Windows: `C:\Users\{user}\AppData\Roaming\LocaLM\LocaLM Server\data`
/// - macOS: `/Users/{user}/Library/Application Support/com.LocaLM.LocaLM-Server`
/// - Linux: `/home/{user}/.local/share/localm-server`
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("com", "LocaLM", "LocaLM Server")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| StorageError::DataDirError("Could not determine data directory".to_string()))
}

/// Default location of downloaded model artifacts
pub fn default_models_dir() -> PathBuf {
    get_data_dir()
        .ok()
        .map(|d| d.join("models"))
        .unwrap_or_else(|| PathBuf::from("./models"))
}
