//! Thin wrapper over the oracle: one place for model, temperatures and
//! token limits.

use std::sync::Arc;

use taskpilot_core::error::OracleError;
use taskpilot_core::{Message, Oracle, OracleRequest, OracleStream};
use tracing::debug;

#[derive(Clone)]
pub struct OracleClient {
    oracle: Arc<dyn Oracle>,
    model: String,
    /// Used for free-text answers, formatting and summaries
    temperature: f32,
    /// Used for structured output: plans, decomposition, observation
    structured_temperature: f32,
    max_tokens: Option<u32>,
}

impl OracleClient {
    pub fn new(oracle: Arc<dyn Oracle>, model: impl Into<String>) -> Self {
        Self {
            oracle,
            model: model.into(),
            temperature: 0.7,
            structured_temperature: 0.2,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_structured_temperature(mut self, temperature: f32) -> Self {
        self.structured_temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, system: &str, user: &str, temperature: f32) -> OracleRequest {
        OracleRequest::new(&self.model, vec![Message::system(system), Message::user(user)])
            .with_temperature(temperature)
            .with_max_tokens(self.max_tokens)
    }

    /// One completion expected to contain structured output.
    pub async fn ask_structured(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let request = self.request(system, user, self.structured_temperature);
        let response = self.oracle.complete(request).await?;
        debug!(oracle = self.oracle.name(), chars = response.content.len(), "Structured oracle response");
        Ok(response.content)
    }

    /// A streamed free-text completion.
    pub async fn stream_text(&self, system: &str, user: &str) -> Result<OracleStream, OracleError> {
        let request = self.request(system, user, self.temperature);
        self.oracle.stream(request).await
    }
}
