//! OpenRouter chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::{CompletionRequest, CompletionService};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenRouterClient {
    base_url: String,
    client: reqwest::Client,
}

impl Default for OpenRouterClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL.to_string())
    }
}

impl OpenRouterClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }
}

#[async_trait]
impl CompletionService for OpenRouterClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let payload = serde_json::json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "assistant", "content": request.history},
                {"role": "user", "content": request.user_text},
            ],
            "temperature": 0.67,
            "top_p": 1,
            "repetition_penalty": 1,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(request.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| LlmError::RequestFailed {
            reason: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                reason: format!("{status}: {body}"),
            });
        }

        let parsed: serde_json::Value = serde_json::from_str(&body)?;
        let content = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::InvalidResponse {
                reason: "missing choices[0].message.content".to_string(),
            })?;

        debug!(model = %request.model, chars = content.len(), "Completion received");
        Ok(content.to_string())
    }
}
