//! Node processors — one handler per node variant, dispatched through a
//! registry built once at startup.

pub mod ai;
pub mod send;
pub mod stage;
pub mod wait;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{DatabaseError, Result};
use crate::flow::model::{FlowNode, NodeType};
use crate::llm::CompletionService;
use crate::provider::ProviderRegistry;
use crate::store::model::Device;
use crate::store::traits::Database;

pub use ai::AiPromptProcessor;
pub use send::{SendMediaProcessor, SendMessageProcessor};
pub use stage::StageProcessor;
pub use wait::{DelayProcessor, WaitingReplyProcessor, WaitingTimesProcessor};

/// What the executor should do after a node finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Route to the next node.
    Continue,
    /// Checkpoint here and stop until the user replies.
    Stop,
}

/// Per-invocation context handed to every processor.
pub struct Invocation {
    pub device: Device,
    pub conversation_id: String,
    pub user_message: String,
}

#[async_trait]
pub trait NodeProcessor: Send + Sync {
    async fn process(&self, inv: &Invocation, node: &FlowNode) -> Result<NodeOutcome>;
}

/// Dispatch table from node type to processor.
pub struct ProcessorRegistry {
    processors: HashMap<NodeType, Box<dyn NodeProcessor>>,
}

impl ProcessorRegistry {
    pub fn build(
        db: Arc<dyn Database>,
        providers: Arc<ProviderRegistry>,
        completions: Arc<dyn CompletionService>,
        completion_retries: u32,
        completion_backoff: Duration,
    ) -> Self {
        let mut processors: HashMap<NodeType, Box<dyn NodeProcessor>> = HashMap::new();

        processors.insert(
            NodeType::SendMessage,
            Box::new(SendMessageProcessor::new(db.clone(), providers.clone())),
        );
        for media in [NodeType::SendImage, NodeType::SendAudio, NodeType::SendVideo] {
            processors.insert(
                media,
                Box::new(SendMediaProcessor::new(db.clone(), providers.clone())),
            );
        }
        processors.insert(NodeType::Delay, Box::new(DelayProcessor));
        processors.insert(
            NodeType::WaitingReply,
            Box::new(WaitingReplyProcessor::new(db.clone())),
        );
        processors.insert(NodeType::WaitingTimes, Box::new(WaitingTimesProcessor));
        processors.insert(NodeType::Stage, Box::new(StageProcessor::new(db.clone())));
        processors.insert(
            NodeType::AiPrompt,
            Box::new(AiPromptProcessor::new(
                db,
                providers,
                completions,
                completion_retries,
                completion_backoff,
            )),
        );

        Self { processors }
    }

    /// The processor for a node type. `start`, `conditions`, and unknown
    /// types have no processor; the executor treats them as pass-through.
    pub fn get(&self, node_type: NodeType) -> Option<&dyn NodeProcessor> {
        self.processors.get(&node_type).map(|p| p.as_ref())
    }
}

/// Append a `"Role: message"` line to the conversation transcript.
pub(crate) async fn append_conv_last(
    db: &dyn Database,
    conversation_id: &str,
    role: &str,
    message: &str,
) -> std::result::Result<(), DatabaseError> {
    let conv = db
        .get_conversation_by_id(conversation_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "conversation".to_string(),
            id: conversation_id.to_string(),
        })?;

    let line = format!("{role}: {message}");
    let conv_last = match conv.conv_last.as_deref() {
        Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
        _ => line,
    };

    let mut fields = serde_json::Map::new();
    fields.insert("conv_last".into(), serde_json::Value::String(conv_last));
    db.update_conversation(conversation_id, &fields).await
}

/// Best-effort transcript append: failures are logged, never fatal.
pub(crate) async fn append_conv_last_logged(
    db: &dyn Database,
    conversation_id: &str,
    role: &str,
    message: &str,
) {
    if let Err(e) = append_conv_last(db, conversation_id, role, message).await {
        warn!(conversation_id, error = %e, "Failed to append to conv_last");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use crate::store::model::Conversation;

    #[tokio::test]
    async fn transcript_appends_in_order() {
        let db = MemoryBackend::new();
        let conv = Conversation::new("dev", "601", "hello");
        db.create_conversation(&conv).await.unwrap();

        append_conv_last(&db, &conv.id, "Bot", "welcome").await.unwrap();
        append_conv_last(&db, &conv.id, "User", "thanks").await.unwrap();

        let loaded = db.get_conversation_by_id(&conv.id).await.unwrap().unwrap();
        assert_eq!(
            loaded.conv_last.as_deref(),
            Some("User: hello\nBot: welcome\nUser: thanks")
        );
    }
}
