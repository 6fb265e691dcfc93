//! Whacenter gateway sender. Uses no API key; the device id selects
//! the account.

use async_trait::async_trait;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{MediaType, ProviderSender};
use crate::store::model::Device;

const DEFAULT_BASE_URL: &str = "https://api.whacenter.com";

pub struct WhacenterSender {
    base_url: String,
    device_id: String,
    client: reqwest::Client,
}

impl WhacenterSender {
    pub fn new(base_url: String, device_id: String) -> Self {
        Self {
            base_url,
            device_id,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_device(device: &Device) -> Self {
        let base_url = device
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, device.instance.clone())
    }

    async fn post(
        &self,
        phone: &str,
        payload: serde_json::Value,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/send", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::SendFailed {
                provider: "whacenter".into(),
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
        debug!(phone, "Whacenter message sent");
        Ok(message_id)
    }
}

#[async_trait]
impl ProviderSender for WhacenterSender {
    async fn send_text(&self, phone: &str, text: &str) -> Result<String, ProviderError> {
        let payload = serde_json::json!({
            "device_id": self.device_id,
            "number": phone,
            "message": text,
        });
        self.post(phone, payload).await
    }

    async fn send_media(
        &self,
        phone: &str,
        media: MediaType,
        url: &str,
    ) -> Result<String, ProviderError> {
        let payload = serde_json::json!({
            "device_id": self.device_id,
            "number": phone,
            "message": "",
            "file": url,
            "type": media.as_str(),
        });
        self.post(phone, payload).await
    }
}
