//! WAHA gateway sender (waha.devlike.pro API).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{MediaType, ProviderSender};
use crate::store::model::Device;

const DEFAULT_BASE_URL: &str = "https://api.waha.pro";

pub struct WahaSender {
    base_url: String,
    api_key: SecretString,
    session: String,
    client: reqwest::Client,
}

impl WahaSender {
    pub fn new(base_url: String, api_key: String, session: String) -> Self {
        Self {
            base_url,
            api_key: api_key.into(),
            session,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_device(device: &Device) -> Self {
        let base_url = device
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, device.api_key.clone(), device.instance.clone())
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
            .header("X-Api-Key", self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::SendFailed {
                provider: "waha".into(),
                phone: phone.into(),
                reason: format!("{status}: {body}"),
            });
        }

        let message_id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(String::from))
            .unwrap_or_default();
        debug!(phone, endpoint, "WAHA message sent");
        Ok(message_id)
    }

    fn chat_id(phone: &str) -> String {
        format!("{phone}@c.us")
    }
}

fn image_mimetype(url: &str) -> &'static str {
    if url.contains(".png") {
        "image/png"
    } else if url.contains(".gif") {
        "image/gif"
    } else if url.contains(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[async_trait]
impl ProviderSender for WahaSender {
    async fn send_text(&self, phone: &str, text: &str) -> Result<String, ProviderError> {
        let payload = serde_json::json!({
            "session": self.session,
            "chatId": Self::chat_id(phone),
            "text": text,
        });
        self.post("sendText", phone, payload).await
    }

    async fn send_media(
        &self,
        phone: &str,
        media: MediaType,
        url: &str,
    ) -> Result<String, ProviderError> {
        let (endpoint, mimetype, filename) = match media {
            MediaType::Image => ("sendImage", image_mimetype(url), "Image"),
            MediaType::Audio => ("sendFile", "audio/mp3", "Audio"),
            MediaType::Video => ("sendVideo", "video/mp4", "Video"),
        };
        let payload = serde_json::json!({
            "session": self.session,
            "chatId": Self::chat_id(phone),
            "file": {
                "mimetype": mimetype,
                "url": url,
                "filename": filename,
            },
            "caption": "",
        });
        self.post(endpoint, phone, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_gets_whatsapp_suffix() {
        assert_eq!(WahaSender::chat_id("60123456789"), "60123456789@c.us");
    }

    #[test]
    fn image_mimetype_follows_extension() {
        assert_eq!(image_mimetype("https://x/pic.png"), "image/png");
        assert_eq!(image_mimetype("https://x/pic.jpg"), "image/jpeg");
    }
}
