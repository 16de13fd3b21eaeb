//! HuggingFace model downloader
//!
//! Fetches GGUF files from the HuggingFace Hub.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::storage::provisioner::{ArtifactSource, ArtifactSpec, ProvisionError};

const HF_BASE_URL: &str = "https://huggingface.co";

/// Log progress every this many bytes
const PROGRESS_STEP: u64 = 64 * 1024 * 1024;

/// Downloads artifacts from a HuggingFace-compatible hub
#[derive(Debug, Clone)]
pub struct HuggingFaceSource {
    base_url: String,
    client: reqwest::Client,
}

impl HuggingFaceSource {
    pub fn new() -> Result<Self, ProvisionError> {
        Self::with_base_url(HF_BASE_URL)
    }

    /// Points at another hub or mirror
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3600)) // 1 hour timeout for large models
            .user_agent(concat!("localm-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::Download(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Build the download URL for the file
    pub fn download_url(&self, spec: &ArtifactSpec) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.base_url, spec.repo_id, spec.revision, spec.filename
        )
    }
}

#[async_trait]
impl ArtifactSource for HuggingFaceSource {
    async fn fetch(&self, spec: &ArtifactSpec, dest: &Path) -> Result<(), ProvisionError> {
        let download_url = self.download_url(spec);
        let temp_path = temp_path_for(dest);

        tracing::info!("Downloading from: {}", download_url);
        let mut response = self
            .client
            .get(&download_url)
            .send()
            .await
            .map_err(|e| ProvisionError::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProvisionError::Download(format!(
                "server answered {}",
                response.status()
            )));
        }

        let total_size = response.content_length();
        if let Some(total) = total_size {
            tracing::info!("File size: {} bytes ({} MB)", total, total / 1024 / 1024);
        }

        // Write to temp file first
        let mut temp_file = File::create(&temp_path).await?;
        let mut downloaded: u64 = 0;
        let mut next_report = PROGRESS_STEP;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProvisionError::Download(e.to_string()))?
        {
            temp_file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if downloaded >= next_report {
                tracing::info!("Downloaded {} MB", downloaded / 1024 / 1024);
                next_report += PROGRESS_STEP;
            }
        }
        temp_file.flush().await?;
        drop(temp_file);

        if let Some(expected) = total_size {
            if downloaded != expected {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(ProvisionError::Incomplete {
                    got: downloaded,
                    expected,
                });
            }
        }

        // Rename temp file to final location (atomic operation)
        tokio::fs::rename(&temp_path, dest).await?;
        tracing::info!("Download complete: {:?}", dest);

        Ok(())
    }
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}
