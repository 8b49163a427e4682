//! Configuration loading, validation, and management for TaskPilot.
//!
//! Loads configuration from `~/.taskpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use taskpilot_core::CapabilityService;

/// The root configuration structure.
///
/// Maps directly to `~/.taskpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default oracle provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per oracle response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Control loop settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Extra service aliases (alias → canonical service name)
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Capability services available to tasks
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    /// Locally stored service credentials
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("engine", &self.engine)
            .field("providers", &self.providers)
            .field("aliases", &self.aliases)
            .field("services", &self.services)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.data.keys().collect();
        keys.sort();
        f.debug_struct("CredentialConfig")
            .field("user", &self.user)
            .field("service", &self.service)
            .field("verified", &self.verified)
            .field("data_keys", &keys)
            .finish()
    }
}

/// Bounds and switches for the control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum planner invocations per task
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Consecutive failed steps that abort a task
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,

    /// Attempts per action before retry stops being suggested
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Character budget for prior results fed back into prompts
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,

    /// Preview length of each digest line when over budget
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Size of raw output chunks streamed for capability results
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Ask the oracle for a readable rendering of capability results
    #[serde(default = "default_true")]
    pub format_results: bool,

    /// Timeout for a single tool invocation
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Temperature for planning, decomposition and observation calls
    #[serde(default = "default_planner_temperature")]
    pub planner_temperature: f32,
}

fn default_max_iterations() -> usize {
    10
}
fn default_max_consecutive_failures() -> usize {
    3
}
fn default_max_retries() -> u32 {
    2
}
fn default_context_budget_chars() -> usize {
    12_000
}
fn default_preview_chars() -> usize {
    100
}
fn default_chunk_chars() -> usize {
    256
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_planner_temperature() -> f32 {
    0.2
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_retries: default_max_retries(),
            context_budget_chars: default_context_budget_chars(),
            preview_chars: default_preview_chars(),
            chunk_chars: default_chunk_chars(),
            format_results: true,
            tool_timeout_secs: default_tool_timeout_secs(),
            planner_temperature: default_planner_temperature(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// A capability service reachable over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Canonical service name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON-RPC endpoint URL
    pub endpoint: String,

    /// Fixed configuration values
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Configuration slots filled from user credentials at connect time
    #[serde(default)]
    pub credential_slots: Vec<String>,
}

impl ServiceConfig {
    /// The engine-facing description of this service, with an empty catalog.
    pub fn to_service(&self) -> CapabilityService {
        let mut service = CapabilityService::new(&self.name, &self.description);
        for (key, value) in &self.config {
            service = service.with_slot(key, Some(value.clone()));
        }
        for slot in &self.credential_slots {
            if !self.config.contains_key(slot) {
                service = service.with_slot(slot, None);
            }
        }
        service
    }
}

/// Credentials for one (user, service) pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub user: String,
    pub service: String,

    #[serde(default = "default_true")]
    pub verified: bool,

    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskpilot/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `TASKPILOT_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path, then apply environment overrides.
    pub fn load_with_overrides(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("TASKPILOT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("TASKPILOT_PROVIDER") {
            self.default_provider = provider;
        }

        if let Ok(model) = std::env::var("TASKPILOT_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskpilot")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.engine.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_iterations must be at least 1".into(),
            ));
        }

        if self.engine.max_consecutive_failures == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_consecutive_failures must be at least 1".into(),
            ));
        }

        if self.engine.chunk_chars == 0 || self.engine.preview_chars == 0 {
            return Err(ConfigError::ValidationError(
                "engine.chunk_chars and engine.preview_chars must be > 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.to_lowercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate service '{}'",
                    service.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Engine-facing descriptions of every configured service.
    pub fn capability_services(&self) -> Vec<CapabilityService> {
        self.services.iter().map(ServiceConfig::to_service).collect()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            engine: EngineConfig::default(),
            providers: HashMap::new(),
            aliases: BTreeMap::new(),
            services: vec![],
            credentials: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
