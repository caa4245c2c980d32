//! Model Manager for local embedding models
//!
//! Downloads and verifies the files a sentence-transformer model needs to run
//! in-process: `config.json`, `tokenizer.json` and `model.safetensors`.

use crate::Result;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Files required to load a BERT-style embedding model
pub const REQUIRED_MODEL_FILES: [&str; 3] = ["config.json", "tokenizer.json", "model.safetensors"];

const HF_BASE_URL: &str = "https://huggingface.co";

/// Paths of a complete local model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Paths inside `dir`, whether or not they exist yet
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            config: dir.join(REQUIRED_MODEL_FILES[0]),
            tokenizer: dir.join(REQUIRED_MODEL_FILES[1]),
            weights: dir.join(REQUIRED_MODEL_FILES[2]),
            dir,
        }
    }

    /// Files that are not on disk
    pub fn missing(&self) -> Vec<&'static str> {
        REQUIRED_MODEL_FILES
            .iter()
            .copied()
            .filter(|name| !self.dir.join(name).is_file())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Model Manager
pub struct ModelManager {
    models_dir: PathBuf,
    base_url: String,
    client: Client,
}

impl ModelManager {
    /// Create new model manager
    pub fn new(models_dir: PathBuf) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(1800)) // weights can be large
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            models_dir,
            base_url: HF_BASE_URL.to_string(),
            client,
        })
    }

    /// Download from a mirror instead of huggingface.co
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Get default models directory
    pub fn default_models_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("ARCHRULE_MODELS_DIR") {
            return PathBuf::from(dir);
        }

        #[cfg(target_os = "linux")]
        {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(".cache/archrule/models");
            }
        }

        #[cfg(target_os = "macos")]
        {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join("Library/Caches/archrule/models");
            }
        }

        #[cfg(target_os = "windows")]
        {
            if let Some(local_app_data) = std::env::var_os("LOCALAPPDATA") {
                return PathBuf::from(local_app_data).join("archrule\\models");
            }
        }

        PathBuf::from("models")
    }

    /// Directory a model id maps to (`org/name` becomes `org--name`)
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.models_dir.join(model_id.replace('/', "--"))
    }

    /// Ensure every model file exists, downloading missing ones
    ///
    /// With `weights_sha256` set, weights that do not match are removed and
    /// the call fails.
    pub async fn ensure_embedding_model(
        &self,
        model_id: &str,
        weights_sha256: Option<&str>,
    ) -> Result<ModelFiles> {
        let files = ModelFiles::in_dir(self.model_dir(model_id));
        let missing = files.missing();

        if missing.is_empty() {
            debug!("Model already present: {}", files.dir.display());
        } else {
            info!("Model {} incomplete, downloading: {:?}", model_id, missing);
            for name in missing {
                let url = format!("{}/{}/resolve/main/{}", self.base_url, model_id, name);
                self.download_file(&url, &files.dir.join(name)).await?;
            }
        }

        if !self.verify_file(&files.weights, weights_sha256).await? {
            fs::remove_file(&files.weights).await?;
            return Err(anyhow::anyhow!(
                "Weights of {} failed checksum verification and were removed",
                model_id
            )
            .into());
        }

        Ok(files)
    }

    /// Download a file through a temporary path, then move it into place
    pub async fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        info!("Downloading {} -> {}", url, dest.display());

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to download {}: {}", url, e))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Download of {} failed with status: {}",
                url,
                response.status()
            )
            .into());
        }

        let pb = match response.content_length() {
            Some(total) => {
                let pb = ProgressBar::new(total);
                let style = ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .map_err(|e| anyhow::anyhow!("Invalid progress template: {}", e))?
                    .progress_chars("#>-");
                pb.set_style(style);
                pb
            }
            None => ProgressBar::new_spinner(),
        };

        let temp_path = dest.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        let written: Result<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| anyhow::anyhow!("Download error: {}", e))?;
                file.write_all(&chunk).await?;
                downloaded += chunk.len() as u64;
                pb.set_position(downloaded);
            }
            file.sync_all().await?;
            Ok(())
        }
        .await;

        pb.finish_and_clear();
        drop(file);

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                warn!("Failed to remove {}: {}", temp_path.display(), cleanup);
            }
            return Err(e);
        }

        if downloaded == 0 {
            fs::remove_file(&temp_path).await?;
            return Err(anyhow::anyhow!("Downloaded file {} is empty", url).into());
        }

        fs::rename(&temp_path, dest).await?;

        info!("Download successful: {} ({} bytes)", dest.display(), downloaded);

        Ok(())
    }

    /// Verify file integrity against an optional SHA256 hex digest
    pub async fn verify_file(&self, path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }

        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let data = fs::read(path).await?;
        let hash = hex::encode(Sha256::digest(&data));

        if !hash.eq_ignore_ascii_case(expected) {
            warn!("Checksum mismatch for {}: {}", path.display(), hash);
            return Ok(false);
        }

        Ok(true)
    }
}
