//! This module provides functionality for loading and validating the bot's configuration.
//!
//! It defines [`BotConfig`], which holds every setting the pipeline needs, and the
//! functions that build it:
//!
//! 1. [`load_config`] reads an optional YAML file (defaults for everything),
//! 2. [`BotConfig::apply_env`] overlays environment variables (API keys usually live here),
//! 3. [`BotConfig::validate`] rejects anything the pipeline cannot run with.
//!
//! The result is constructed once in `main` and passed by reference to each client; nothing
//! reads the environment after startup.
//!
//! # Examples
//!
//! ```no_run
//! use iota_bot::config::BotConfig;
//!
//! let config = BotConfig::from_sources(None).unwrap();
//! config.validate().unwrap();
//! println!("{:?}", config.generation.model);
//! ```

use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{BotError, Result},
    persona::{Persona, PersonaConfig},
};

/// Hosted embedding API (Hugging Face inference, feature-extraction pipeline).
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    /// Must match the vector index dimension.
    pub dimension: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://router.huggingface.co/hf-inference/models".to_string(),
            model: "intfloat/multilingual-e5-large-instruct".to_string(),
            dimension: 1024,
            max_attempts: 2,
            retry_base_delay_ms: 350,
        }
    }
}

/// Hosted vector database (Pinecone data plane).
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub api_key: String,
    /// Used to look the host up when `index_host` is not set.
    pub index_name: Option<String>,
    pub index_host: Option<String>,
    pub control_plane_url: String,
    pub namespace: Option<String>,
    pub min_score: Option<f32>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            index_name: None,
            index_host: None,
            control_plane_url: "https://api.pinecone.io".to_string(),
            namespace: None,
            min_score: None,
        }
    }
}

/// Hosted LLM, spoken to through its OpenAI-compatible endpoint.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub system_prompt: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.5-pro".to_string(),
            temperature: 0.6,
            system_prompt: "You are a helpful AI.".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Defaults to `<config_dir>/cache/responses.db`.
    pub path: Option<PathBuf>,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            max_entries: 1000,
        }
    }
}

/// Where the persona comes from. `persona_json` wins over `persona_file`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct PersonaSettings {
    pub public_name: String,
    pub private_name: Option<String>,
    pub persona_json: Option<String>,
    pub persona_file: Option<PathBuf>,
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            public_name: "iota".to_string(),
            private_name: None,
            persona_json: None,
            persona_file: None,
        }
    }
}

/// Represents the bot's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct BotConfig {
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub persona: PersonaSettings,

    /// Exchanges retrieved per turn.
    pub top_k: usize,

    /// Exchanges buffered before an upsert; 1 writes every turn.
    pub upsert_batch_size: usize,

    /// Per-call timeout for every hosted API.
    pub request_timeout_secs: u64,

    /// When set, logs are also appended to `<log_dir>/iota_bot.YYYY-MM-DD.log` (one file per UTC day).
    pub log_dir: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            generation: GenerationConfig::default(),
            cache: CacheConfig::default(),
            persona: PersonaSettings::default(),
            top_k: 3,
            upsert_batch_size: 1,
            request_timeout_secs: 30,
            log_dir: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| BotError::configuration(format!("{name} has an invalid value: {value:?}")))
}

impl BotConfig {
    /// Build the configuration from the optional YAML file and the process environment.
    ///
    /// A `.env` file in the working directory is loaded first. Without an explicit `file`,
    /// `<config_dir>/config.yaml` is used when it exists.
    pub fn from_sources(file: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let default_file = crate::config_dir().ok().map(|d| d.join("config.yaml"));
        let mut config = match (file, default_file) {
            (Some(path), _) => load_config(path)?,
            (None, Some(path)) if path.is_file() => load_config(&path)?,
            _ => BotConfig::default(),
        };

        config.apply_env(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Overlay environment variables. Empty values are ignored.
    ///
    /// `lookup` is `std::env::var` in production and a map in tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| non_empty(lookup(name));

        if let Some(v) = get("HF_API_KEY") {
            self.embedding.api_key = v;
        }
        if let Some(v) = get("HF_EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("HF_API_BASE") {
            self.embedding.api_base = v;
        }
        if let Some(v) = get("EMBED_DIMENSION") {
            self.embedding.dimension = parse_var("EMBED_DIMENSION", &v)?;
        }

        if let Some(v) = get("PINECONE_API_KEY") {
            self.vector_store.api_key = v;
        }
        if let Some(v) = get("PINECONE_INDEX_NAME") {
            self.vector_store.index_name = Some(v);
        }
        if let Some(v) = get("PINECONE_INDEX_HOST") {
            self.vector_store.index_host = Some(v);
        }

        if let Some(v) = get("GOOGLE_API_KEY") {
            self.generation.api_key = v;
        }
        if let Some(v) = get("GEMINI_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = get("GEMINI_API_BASE") {
            self.generation.api_base = v;
        }

        if let Some(v) = get("PUBLIC_NAME") {
            self.persona.public_name = v;
        }
        if let Some(v) = get("PRIVATE_NAME") {
            self.persona.private_name = Some(v);
        }
        if let Some(v) = get("PERSONA_JSON") {
            self.persona.persona_json = Some(v);
        }
        if let Some(v) = get("IOTA_PERSONA_FILE") {
            self.persona.persona_file = Some(PathBuf::from(v));
        }

        if let Some(v) = get("IOTA_CACHE_DB") {
            self.cache.path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("IOTA_TOP_K") {
            self.top_k = parse_var("IOTA_TOP_K", &v)?;
        }
        if let Some(v) = get("IOTA_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }

        Ok(())
    }

    /// Check everything a chat turn needs. Cache management commands skip this.
    ///
    /// # Errors
    /// [`BotError::Configuration`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| Err(BotError::configuration(format!("{what} not set")));

        if self.embedding.api_key.is_empty() {
            return missing("HF_API_KEY");
        }
        if self.vector_store.api_key.is_empty() {
            return missing("PINECONE_API_KEY");
        }
        if self.vector_store.index_host.is_none() && self.vector_store.index_name.is_none() {
            return missing("PINECONE_INDEX_NAME (or PINECONE_INDEX_HOST)");
        }
        if self.generation.api_key.is_empty() {
            return missing("GOOGLE_API_KEY");
        }
        if self.embedding.dimension == 0 {
            return Err(BotError::configuration("embedding dimension must be positive"));
        }
        if self.top_k == 0 {
            return Err(BotError::configuration("top_k must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(BotError::configuration(format!(
                "temperature {} is outside 0.0..=2.0",
                self.generation.temperature
            )));
        }
        if let Some(min) = self.vector_store.min_score {
            if !(0.0..=1.0).contains(&min) {
                return Err(BotError::configuration(format!(
                    "min_score {min} is outside 0.0..=1.0"
                )));
            }
        }

        self.persona_config()?;
        Ok(())
    }

    /// Resolve and validate the persona.
    pub fn persona_config(&self) -> Result<PersonaConfig> {
        let settings = &self.persona;
        let persona = match (&settings.persona_json, &settings.persona_file) {
            (Some(raw), _) => Persona::from_raw(raw)?,
            (None, Some(path)) => Persona::load_file(path).map_err(|e| {
                BotError::configuration(format!("persona file {}: {e}", path.display()))
            })?,
            (None, None) => Persona::default_for(&settings.public_name),
        };

        PersonaConfig::new(
            settings.public_name.clone(),
            settings.private_name.clone(),
            persona,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn cache_path(&self) -> Result<PathBuf> {
        match &self.cache.path {
            Some(path) => Ok(path.clone()),
            None => Ok(crate::config_dir()?.join("cache").join("responses.db")),
        }
    }
}

/// Loads the bot's configuration from a YAML file.
///
/// Missing sections and fields take their defaults, so a file containing only
/// `top_k: 5` is valid.
///
/// # Errors
///
/// The file cannot be read, or is not YAML matching [`BotConfig`].
pub fn load_config(file: &Path) -> Result<BotConfig> {
    debug!("Loading config from: {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: BotConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, io::Write};
    use tempfile::NamedTempFile;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn complete_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("HF_API_KEY", "hf"),
            ("PINECONE_API_KEY", "pc"),
            ("PINECONE_INDEX_NAME", "iota-chats"),
            ("GOOGLE_API_KEY", "g"),
        ]
    }

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
top_k: 5
generation:
  model: "gemini-2.5-flash"
  temperature: 0.3
cache:
  max_entries: 50
persona:
  public_name: "iota"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.generation.model, "gemini-2.5-flash");
        assert_eq!(config.cache.max_entries, 50);
        // Untouched fields keep their defaults.
        assert_eq!(config.embedding.dimension, 1024);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_load_config_invalid_file() {
        assert!(load_config(Path::new("non/existent/path")).is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();
        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_overrides_and_validates() {
        let mut config = BotConfig::default();
        let mut vars = complete_env();
        vars.push(("GEMINI_MODEL", "gemini-2.5-flash"));
        vars.push(("IOTA_TOP_K", "7"));
        vars.push(("PRIVATE_NAME", "  "));
        config.apply_env(env_of(&vars)).unwrap();

        assert_eq!(config.embedding.api_key, "hf");
        assert_eq!(config.vector_store.index_name.as_deref(), Some("iota-chats"));
        assert_eq!(config.generation.model, "gemini-2.5-flash");
        assert_eq!(config.top_k, 7);
        assert_eq!(config.persona.private_name, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let mut config = BotConfig::default();
        config
            .apply_env(env_of(&[("HF_API_KEY", "hf"), ("PINECONE_API_KEY", "pc")]))
            .unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, BotError::Configuration(_)));
        assert!(err.to_string().contains("PINECONE_INDEX_NAME"));
    }

    #[test]
    fn test_bad_number_is_configuration_error() {
        let mut config = BotConfig::default();
        let err = config
            .apply_env(env_of(&[("IOTA_TOP_K", "lots")]))
            .unwrap_err();
        assert!(matches!(err, BotError::Configuration(_)));
    }

    #[test]
    fn test_invalid_persona_json_fails_validation() {
        let mut config = BotConfig::default();
        let mut vars = complete_env();
        vars.push(("PERSONA_JSON", "{not json"));
        config.apply_env(env_of(&vars)).unwrap();

        assert!(matches!(config.validate(), Err(BotError::Configuration(_))));
    }

    #[test]
    fn test_persona_defaults_to_public_name() {
        let mut config = BotConfig::default();
        config.persona.public_name = "mimi".into();
        let persona = config.persona_config().unwrap();
        assert_eq!(persona.display_name(), "mimi");
        assert!(!persona.persona.rules.is_empty());
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let config = BotConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: BotConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, back);
    }
}
