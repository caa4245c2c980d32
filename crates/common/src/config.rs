use crate::error::ArchRuleError;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Project-level config file name, looked up from the working directory upwards
pub const PROJECT_CONFIG_FILE: &str = ".archrule.toml";

/// Embedding source supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// OpenAI embeddings API (batch-capable)
    #[serde(rename = "openai")]
    OpenAi,
    /// Ollama embeddings API (one text per call)
    #[serde(rename = "ollama")]
    Ollama,
    /// In-process sentence-transformer model
    #[serde(rename = "local")]
    Local,
}

impl BackendKind {
    /// Every backend, in the default auto-selection order
    pub const ALL: [BackendKind; 3] = [BackendKind::OpenAi, BackendKind::Ollama, BackendKind::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ArchRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "local" => Ok(Self::Local),
            other => Err(ArchRuleError::config(format!(
                "Unknown embedding backend '{}' (expected openai, ollama or local)",
                other
            ))),
        }
    }
}

/// How the embedding backend is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendMode {
    /// First backend of the preference list that probes available
    #[default]
    Auto,
    /// Only the named backend; a failed probe means no embeddings
    Explicit(BackendKind),
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Explicit(kind) => fmt::Display::fmt(kind, f),
        }
    }
}

impl FromStr for BackendMode {
    type Err = ArchRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(Self::Auto)
        } else {
            s.parse().map(Self::Explicit)
        }
    }
}

impl TryFrom<String> for BackendMode {
    type Error = ArchRuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendMode> for String {
    fn from(mode: BackendMode) -> Self {
        mode.to_string()
    }
}

/// OpenAI backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key (also read from OPENAI_API_KEY)
    pub api_key: Option<String>,

    /// API base URL
    pub base_url: String,

    /// Embedding model name
    pub model: String,

    /// Maximum texts per request
    pub max_batch_size: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            max_batch_size: 100,
        }
    }
}

/// Ollama backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Ollama API base URL
    pub base_url: String,

    /// Embedding model name
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
        }
    }
}

/// Local model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelConfig {
    /// Hugging Face model id
    pub model_id: String,

    /// Directory holding config.json, tokenizer.json and model.safetensors.
    /// Defaults to the models cache directory.
    pub model_dir: Option<PathBuf>,

    /// Fetch missing model files on first use
    pub auto_download: bool,

    /// Expected SHA256 of model.safetensors, checked before loading
    pub weights_sha256: Option<String>,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            model_dir: None,
            auto_download: true,
            weights_sha256: None,
        }
    }
}

/// Embedding generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `auto` or an explicit backend name
    pub backend: BackendMode,

    /// Fixed vector length every backend must produce
    pub dimensions: usize,

    /// Upper bound for every backend call
    pub timeout_secs: u64,

    /// Upper bound for a backend probe (the local model may load or
    /// download on its first probe)
    pub probe_timeout_secs: u64,

    /// Auto-selection order
    pub preference: Vec<BackendKind>,

    pub openai: OpenAiConfig,
    pub ollama: OllamaConfig,
    pub local: LocalModelConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: BackendMode::Auto,
            dimensions: 384,
            timeout_secs: 30,
            probe_timeout_secs: 120,
            preference: BackendKind::ALL.to_vec(),
            openai: OpenAiConfig::default(),
            ollama: OllamaConfig::default(),
            local: LocalModelConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Backends to try, in order, for the configured mode
    pub fn candidates(&self) -> Vec<BackendKind> {
        match self.backend {
            BackendMode::Auto => self.preference.clone(),
            BackendMode::Explicit(kind) => vec![kind],
        }
    }
}

/// Guidance store (PostgREST / Supabase) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Project URL, e.g. https://xyz.supabase.co
    pub url: Option<String>,

    /// Service or anon key
    pub api_key: Option<String>,

    /// Table holding the guidance records
    pub table: String,

    /// Upper bound for every store call
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            table: "rules".to_string(),
            timeout_secs: 15,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Both URL and key are present
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
            && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Search behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result count when the caller does not pass one
    pub default_limit: usize,

    /// Drop results scoring below this value
    pub min_similarity: Option<f32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            min_similarity: None,
        }
    }
}

/// ArchRule application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub embedding: EmbeddingConfig,

    pub store: StoreConfig,

    pub search: SearchConfig,

    /// Log directory
    pub log_dir: PathBuf,

    /// Log level
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            search: SearchConfig::default(),
            log_dir: PathBuf::from("./.archrule/log"),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from config files, environment variables and .env
    ///
    /// Precedence, lowest first: defaults, global config file, project
    /// config file, `ARCHRULE__SECTION__KEY` variables, well-known variables.
    pub fn from_env() -> Result<Self, ArchRuleError> {
        // Load .env file (ignore if not exists)
        let _ = dotenv::dotenv();

        let mut files = Vec::new();
        if let Some(global) = Self::global_config_path() {
            files.push(global);
        }
        if let Some(project) = std::env::current_dir()
            .ok()
            .and_then(|dir| Self::find_project_config(&dir))
        {
            files.push(project);
        }

        let mut config = Self::load_layered(&files)?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Merge the given TOML files (missing ones are skipped) and
    /// `ARCHRULE__` prefixed variables over the defaults
    pub fn load_layered(files: &[PathBuf]) -> Result<Self, ArchRuleError> {
        let mut builder = Config::builder();
        for path in files {
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }
        builder = builder.add_source(
            Environment::with_prefix("ARCHRULE")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| ArchRuleError::config(format!("Failed to load configuration: {}", e)))
    }

    /// `~/.config/archrule/config.toml`
    pub fn global_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("archrule")
                .join("config.toml")
        })
    }

    /// Find `.archrule.toml` in `start` or any of its ancestors
    pub fn find_project_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(PROJECT_CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Apply the conventional variable names used by deployment scripts
    fn apply_env_overrides(&mut self) -> Result<(), ArchRuleError> {
        if let Some(mode) = Self::get_env("ARCHRULE_EMBEDDING_BACKEND") {
            self.embedding.backend = mode.parse()?;
        }
        if let Some(dims) = Self::get_env("ARCHRULE_EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions = dims.parse().map_err(|_| {
                ArchRuleError::config(format!("Invalid ARCHRULE_EMBEDDING_DIMENSIONS '{}'", dims))
            })?;
        }
        if let Some(order) = Self::get_env("ARCHRULE_EMBEDDING_PREFERENCE") {
            self.embedding.preference = order
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()?;
        }
        if let Some(key) = Self::get_env("OPENAI_API_KEY") {
            self.embedding.openai.api_key = Some(key);
        }
        if let Some(url) = Self::get_env("OLLAMA_BASE_URL") {
            self.embedding.ollama.base_url = url;
        }
        if let Some(url) = Self::get_env("ARCHRULE_SUPABASE_URL") {
            self.store.url = Some(url);
        }
        if let Some(key) = Self::get_env("ARCHRULE_SUPABASE_KEY") {
            self.store.api_key = Some(key);
        }
        if let Some(level) = Self::get_env("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    /// Non-empty environment variable
    fn get_env(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ArchRuleError> {
        let embedding = &self.embedding;

        if embedding.dimensions == 0 {
            return Err(ArchRuleError::config("Embedding dimensions must be greater than 0"));
        }

        if embedding.timeout_secs == 0
            || embedding.probe_timeout_secs == 0
            || self.store.timeout_secs == 0
        {
            return Err(ArchRuleError::config("Timeouts must be greater than 0 seconds"));
        }

        if embedding.backend == BackendMode::Auto && embedding.preference.is_empty() {
            return Err(ArchRuleError::config(
                "Embedding preference list cannot be empty in auto mode",
            ));
        }

        if embedding.openai.max_batch_size == 0 {
            return Err(ArchRuleError::config("OpenAI max_batch_size must be greater than 0"));
        }

        Self::validate_url("OpenAI base URL", &embedding.openai.base_url)?;
        Self::validate_url("Ollama base URL", &embedding.ollama.base_url)?;
        if let Some(url) = &self.store.url {
            Self::validate_url("Store URL", url)?;
        }

        if let Some(min) = self.search.min_similarity {
            if !(-1.0..=1.0).contains(&min) {
                return Err(ArchRuleError::config(
                    "search.min_similarity must be between -1.0 and 1.0",
                ));
            }
        }

        Ok(())
    }

    fn validate_url(name: &str, url: &str) -> Result<(), ArchRuleError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ArchRuleError::config(format!(
                "{} must start with http:// or https://",
                name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.embedding.backend, BackendMode::Auto);
        assert_eq!(config.embedding.preference, BackendKind::ALL.to_vec());
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.store.table, "rules");
    }

    #[test]
    fn test_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid_config = AppConfig::default();
        invalid_config.embedding.dimensions = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = AppConfig::default();
        invalid_config.embedding.preference.clear();
        assert!(invalid_config.validate().is_err());

        // An explicit backend does not need a preference list
        invalid_config.embedding.backend = BackendMode::Explicit(BackendKind::Ollama);
        assert!(invalid_config.validate().is_ok());

        let mut invalid_config = AppConfig::default();
        invalid_config.embedding.ollama.base_url = "localhost:11434".to_string();
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_backend_mode_parse() {
        assert_eq!("auto".parse::<BackendMode>().unwrap(), BackendMode::Auto);
        assert_eq!(
            "OpenAI".parse::<BackendMode>().unwrap(),
            BackendMode::Explicit(BackendKind::OpenAi)
        );
        assert_eq!(
            " local ".parse::<BackendMode>().unwrap(),
            BackendMode::Explicit(BackendKind::Local)
        );
        assert!("cohere".parse::<BackendMode>().is_err());
        assert_eq!(BackendMode::Explicit(BackendKind::Ollama).to_string(), "ollama");
    }

    #[test]
    fn test_candidates_follow_mode() {
        let mut config = EmbeddingConfig::default();
        config.preference = vec![BackendKind::Local, BackendKind::OpenAi];
        assert_eq!(config.candidates(), vec![BackendKind::Local, BackendKind::OpenAi]);

        config.backend = BackendMode::Explicit(BackendKind::Ollama);
        assert_eq!(config.candidates(), vec![BackendKind::Ollama]);
    }

    #[test]
    #[serial]
    fn test_project_file_overrides_global_file() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        let project = dir.path().join("project.toml");

        std::fs::write(
            &global,
            r#"
log_level = "debug"

[embedding]
backend = "ollama"
dimensions = 768

[embedding.ollama]
model = "mxbai-embed-large"
"#,
        )
        .unwrap();
        std::fs::write(
            &project,
            r#"
[embedding]
dimensions = 512
preference = ["local", "ollama"]

[search]
min_similarity = 0.1
"#,
        )
        .unwrap();

        let config = AppConfig::load_layered(&[global, project]).unwrap();
        assert_eq!(config.embedding.backend, BackendMode::Explicit(BackendKind::Ollama));
        assert_eq!(config.embedding.dimensions, 512);
        assert_eq!(
            config.embedding.preference,
            vec![BackendKind::Local, BackendKind::Ollama]
        );
        assert_eq!(config.embedding.ollama.model, "mxbai-embed-large");
        // Untouched keys keep their defaults
        assert_eq!(config.embedding.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.search.min_similarity, Some(0.1));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_layered(&[dir.path().join("absent.toml")]).unwrap();
        assert_eq!(config.embedding.dimensions, 384);
    }

    #[test]
    #[serial]
    fn test_prefixed_environment_overrides_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "[embedding]\ndimensions = 768\n").unwrap();

        std::env::set_var("ARCHRULE__EMBEDDING__DIMENSIONS", "256");
        let config = AppConfig::load_layered(&[file]);
        std::env::remove_var("ARCHRULE__EMBEDDING__DIMENSIONS");

        assert_eq!(config.unwrap().embedding.dimensions, 256);
    }

    #[test]
    #[serial]
    fn test_well_known_environment_overrides() {
        std::env::set_var("ARCHRULE_EMBEDDING_BACKEND", "local");
        std::env::set_var("ARCHRULE_EMBEDDING_PREFERENCE", "ollama,local");
        std::env::set_var("ARCHRULE_SUPABASE_URL", "https://example.supabase.co");

        let mut config = AppConfig::default();
        let result = config.apply_env_overrides();

        std::env::remove_var("ARCHRULE_EMBEDDING_BACKEND");
        std::env::remove_var("ARCHRULE_EMBEDDING_PREFERENCE");
        std::env::remove_var("ARCHRULE_SUPABASE_URL");

        assert!(result.is_ok());
        assert_eq!(config.embedding.backend, BackendMode::Explicit(BackendKind::Local));
        assert_eq!(
            config.embedding.preference,
            vec![BackendKind::Ollama, BackendKind::Local]
        );
        assert_eq!(config.store.url.as_deref(), Some("https://example.supabase.co"));
    }

    #[test]
    fn test_find_project_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE), "").unwrap();

        let found = AppConfig::find_project_config(&nested).unwrap();
        assert_eq!(found, dir.path().join(PROJECT_CONFIG_FILE));
    }

    #[test]
    fn test_store_is_configured() {
        let mut store = StoreConfig::default();
        assert!(!store.is_configured());
        store.url = Some("https://example.supabase.co".to_string());
        store.api_key = Some(String::new());
        assert!(!store.is_configured());
        store.api_key = Some("key".to_string());
        assert!(store.is_configured());
    }
}
