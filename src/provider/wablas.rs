//! Wablas gateway sender.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{MediaType, ProviderSender};
use crate::store::model::Device;

const DEFAULT_BASE_URL: &str = "https://console.wablas.com";

pub struct WablasSender {
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl WablasSender {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_device(device: &Device) -> Self {
        let base_url = device
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, device.api_key.clone())
    }

    async fn post(
        &self,
        endpoint: &str,
        phone: &str,
        payload: serde_json::Value,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/{endpoint}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::SendFailed {
                provider: "wablas".into(),
                phone: phone.into(),
                reason: format!("{status}: {body}"),
            });
        }

        let message_id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message_id")
                    .and_then(|id| id.as_str())
                    .map(String::from)
            })
            .unwrap_or_default();
        debug!(phone, endpoint, "Wablas message sent");
        Ok(message_id)
    }
}

#[async_trait]
impl ProviderSender for WablasSender {
    async fn send_text(&self, phone: &str, text: &str) -> Result<String, ProviderError> {
        let payload = serde_json::json!({
            "phone": phone,
            "message": text,
        });
        self.post("send-message", phone, payload).await
    }

    async fn send_media(
        &self,
        phone: &str,
        _media: MediaType,
        url: &str,
    ) -> Result<String, ProviderError> {
        // Wablas exposes a single image endpoint for media attachments.
        let payload = serde_json::json!({
            "phone": phone,
            "image": url,
            "caption": "",
        });
        self.post("send-image", phone, payload).await
    }
}
