//! Oracle selection from configuration.

use std::sync::Arc;

use taskpilot_config::AppConfig;
use taskpilot_core::error::OracleError;
use taskpilot_core::oracle::Oracle;
use tracing::info;

use crate::openai_compat::OpenAiCompatOracle;

/// Build the configured default oracle.
///
/// Per-provider settings under `[providers.<name>]` override the global
/// API key. Ollama runs without a key; every other provider needs one.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Oracle>, OracleError> {
    let name = config.default_provider.as_str();
    let provider_config = config.providers.get(name);

    let api_key = provider_config
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone());

    let base_url = provider_config
        .and_then(|p| p.api_url.clone())
        .or_else(|| default_base_url(name).map(String::from))
        .ok_or_else(|| OracleError::NotConfigured(format!("no api_url configured for provider '{name}'")))?;

    let api_key = match (name, api_key) {
        ("ollama", key) => key.unwrap_or_else(|| "ollama".into()),
        (_, Some(key)) => key,
        (_, None) => {
            return Err(OracleError::NotConfigured(format!(
                "no API key for provider '{name}'; set TASKPILOT_API_KEY or api_key in config"
            )));
        }
    };

    info!(provider = name, base_url = %base_url, "Oracle configured");
    Ok(Arc::new(OpenAiCompatOracle::new(name, base_url, api_key)))
}

/// The model to request: per-provider override, else the global default.
pub fn model_for(config: &AppConfig) -> String {
    config
        .providers
        .get(&config.default_provider)
        .and_then(|p| p.default_model.clone())
        .unwrap_or_else(|| config.default_model.clone())
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> Option<&'static str> {
    match provider_name {
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "openai" => Some("https://api.openai.com/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        _ => None,
    }
}
