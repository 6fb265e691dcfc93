//! WhatsApp gateway senders and the registry that owns them.

pub mod wablas;
pub mod waha;
pub mod whacenter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ProviderError;
use crate::store::model::Device;

pub use wablas::WablasSender;
pub use waha::WahaSender;
pub use whacenter::WhacenterSender;

/// Kind of media attachment a node can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

/// One WhatsApp gateway connection. Returns the gateway message id
/// (empty when the gateway does not report one).
#[async_trait]
pub trait ProviderSender: Send + Sync {
    async fn send_text(&self, phone: &str, text: &str) -> Result<String, ProviderError>;

    async fn send_media(
        &self,
        phone: &str,
        media: MediaType,
        url: &str,
    ) -> Result<String, ProviderError>;
}

/// Registry of live senders, keyed by (provider, instance).
///
/// Senders are created lazily from the device row on first use and
/// reused afterwards. Tests can pre-register mocks.
#[derive(Default)]
pub struct ProviderRegistry {
    senders: RwLock<HashMap<(String, String), Arc<dyn ProviderSender>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a sender for (provider, instance).
    pub async fn register(
        &self,
        provider: &str,
        instance: &str,
        sender: Arc<dyn ProviderSender>,
    ) {
        self.senders
            .write()
            .await
            .insert((provider.to_string(), instance.to_string()), sender);
    }

    /// The sender for a device, building one from the device row if needed.
    pub async fn sender_for(
        &self,
        device: &Device,
    ) -> Result<Arc<dyn ProviderSender>, ProviderError> {
        let key = (device.provider.clone(), device.instance.clone());

        if let Some(sender) = self.senders.read().await.get(&key) {
            return Ok(sender.clone());
        }

        let sender: Arc<dyn ProviderSender> = match device.provider.as_str() {
            "waha" => Arc::new(WahaSender::from_device(device)),
            "wablas" => Arc::new(WablasSender::from_device(device)),
            "whacenter" => Arc::new(WhacenterSender::from_device(device)),
            _ => {
                return Err(ProviderError::NotRegistered {
                    provider: device.provider.clone(),
                    instance: device.instance.clone(),
                });
            }
        };

        debug!(provider = %device.provider, instance = %device.instance, "Provider sender created");
        self.senders.write().await.insert(key, sender.clone());
        Ok(sender)
    }
}
