//! Message and media send processors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{DatabaseError, Result};
use crate::flow::model::{FlowNode, NodeType};
use crate::flow::processors::{Invocation, NodeOutcome, NodeProcessor, append_conv_last};
use crate::flow::templates;
use crate::provider::{MediaType, ProviderRegistry};
use crate::store::traits::Database;

pub struct SendMessageProcessor {
    db: Arc<dyn Database>,
    providers: Arc<ProviderRegistry>,
}

impl SendMessageProcessor {
    pub fn new(db: Arc<dyn Database>, providers: Arc<ProviderRegistry>) -> Self {
        Self { db, providers }
    }
}

#[async_trait]
impl NodeProcessor for SendMessageProcessor {
    async fn process(&self, inv: &Invocation, node: &FlowNode) -> Result<NodeOutcome> {
        let Some(text) = node.config_str("text") else {
            warn!(node_id = %node.id, "No text configured for send_message node");
            return Ok(NodeOutcome::Continue);
        };

        let conv = self
            .db
            .get_conversation_by_id(&inv.conversation_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "conversation".to_string(),
                id: inv.conversation_id.clone(),
            })?;

        let text = templates::populate_customer_template(text, &conv);

        let sender = self.providers.sender_for(&inv.device).await?;
        sender.send_text(&conv.phone, &text).await?;
        info!(phone = %conv.phone, node_id = %node.id, "Message sent");

        append_conv_last(self.db.as_ref(), &inv.conversation_id, "Bot", &text).await?;
        Ok(NodeOutcome::Continue)
    }
}

pub struct SendMediaProcessor {
    db: Arc<dyn Database>,
    providers: Arc<ProviderRegistry>,
}

impl SendMediaProcessor {
    pub fn new(db: Arc<dyn Database>, providers: Arc<ProviderRegistry>) -> Self {
        Self { db, providers }
    }
}

#[async_trait]
impl NodeProcessor for SendMediaProcessor {
    async fn process(&self, inv: &Invocation, node: &FlowNode) -> Result<NodeOutcome> {
        let Some(url) = node.config_str("url") else {
            warn!(node_id = %node.id, "No URL configured for media node");
            return Ok(NodeOutcome::Continue);
        };

        let media = match node.node_type {
            NodeType::SendImage => MediaType::Image,
            NodeType::SendAudio => MediaType::Audio,
            NodeType::SendVideo => MediaType::Video,
            other => {
                warn!(node_id = %node.id, ?other, "Media processor got a non-media node");
                return Ok(NodeOutcome::Continue);
            }
        };

        let conv = self
            .db
            .get_conversation_by_id(&inv.conversation_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "conversation".to_string(),
                id: inv.conversation_id.clone(),
            })?;

        let sender = self.providers.sender_for(&inv.device).await?;
        sender.send_media(&conv.phone, media, url).await?;
        info!(phone = %conv.phone, media = media.as_str(), "Media sent");

        // Transcript records the raw URL.
        append_conv_last(self.db.as_ref(), &inv.conversation_id, "Bot", url).await?;
        Ok(NodeOutcome::Continue)
    }
}
