//! Provider transport only: no gating, no caching, no audit. Input is
//! already redacted by the time it reaches a `Provider`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model_name: String,
    pub model_version: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub raw_json: Value,
    pub content: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat_json(&self, req: &LlmRequest) -> Result<LlmResponse, ProviderError>;
}

/// A provider that returns a fixed JSON document regardless of the
/// request, keyed only by `model_name`. Used by tests and by any
/// deployment that wants a deterministic stand-in instead of a live
/// model (`determinism_mode` already keeps a real provider from being
/// dispatched, so this exists for exercising the rest of the pipeline
/// without network access).
pub struct FixtureProvider {
    pub responses: std::collections::BTreeMap<String, Value>,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self { responses: std::collections::BTreeMap::new() }
    }

    pub fn with_response(mut self, model_name: impl Into<String>, body: Value) -> Self {
        self.responses.insert(model_name.into(), body);
        self
    }
}

impl Default for FixtureProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for FixtureProvider {
    async fn chat_json(&self, req: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let body = self
            .responses
            .get(&req.model_name)
            .cloned()
            .ok_or_else(|| ProviderError::InvalidResponse(format!("no fixture for model {}", req.model_name)))?;
        Ok(LlmResponse { content: body.to_string(), raw_json: body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_provider_returns_registered_body() {
        let provider = FixtureProvider::new().with_response("test-model", serde_json::json!({"ok": true}));
        let req = LlmRequest {
            model_name: "test-model".into(),
            model_version: "1".into(),
            system_prompt: "sys".into(),
            user_prompt: "usr".into(),
            temperature: 0.0,
            max_output_tokens: 64,
        };
        let resp = provider.chat_json(&req).await.unwrap();
        assert_eq!(resp.raw_json, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn fixture_provider_fails_on_unknown_model() {
        let provider = FixtureProvider::new();
        let req = LlmRequest {
            model_name: "missing".into(),
            model_version: "1".into(),
            system_prompt: "sys".into(),
            user_prompt: "usr".into(),
            temperature: 0.0,
            max_output_tokens: 64,
        };
        assert!(provider.chat_json(&req).await.is_err());
    }
}
