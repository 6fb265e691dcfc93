//! Batch processor — the debounce sink that drives flow execution.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::debounce::{DebounceKey, DebounceSink};
use crate::error::{Error, PipelineError, Result};
use crate::flow::FlowExecutor;
use crate::flow::processors::append_conv_last_logged;
use crate::guard::{GuardOutcome, run_guarded};
use crate::store::model::{Conversation, Device, StoredFlow};
use crate::store::traits::Database;

pub struct MessageProcessor {
    db: Arc<dyn Database>,
    executor: FlowExecutor,
}

/// Lock namespace for a flow, derived from its name and niche.
fn flow_kind(flow: &StoredFlow) -> &'static str {
    let haystack = format!(
        "{} {}",
        flow.name.to_lowercase(),
        flow.niche.as_deref().unwrap_or("").to_lowercase()
    );
    if haystack.contains("ai") || haystack.contains("chatbot") {
        "chatbot_ai"
    } else {
        "whatsapp_bot"
    }
}

impl MessageProcessor {
    pub fn new(db: Arc<dyn Database>, executor: FlowExecutor) -> Self {
        Self { db, executor }
    }

    /// Load or create the conversation row for this contact. Returns the
    /// row and whether it was just created. New rows get the sender's
    /// push name as the initial prospect name.
    async fn conversation_for(
        &self,
        device: &Device,
        phone: &str,
        text: &str,
        push_name: Option<&str>,
    ) -> Result<(Conversation, bool)> {
        if let Some(conv) = self.db.get_conversation(&device.device_id, phone).await? {
            return Ok((conv, false));
        }
        let mut conv = Conversation::new(&device.device_id, phone, text);
        conv.prospect_name = push_name.filter(|name| !name.is_empty()).map(String::from);
        self.db.create_conversation(&conv).await?;
        info!(phone, conversation_id = %conv.id, "Conversation created");
        Ok((conv, true))
    }

    async fn process_batch(
        &self,
        key: &DebounceKey,
        text: &str,
        push_name: Option<&str>,
    ) -> Result<()> {
        let device = self
            .db
            .get_device_by_device_id(&key.device_id)
            .await?
            .ok_or_else(|| {
                Error::Pipeline(PipelineError::DeviceNotFound(key.device_id.clone()))
            })?;

        let flows = self.db.get_flows_by_device(&device.device_id).await?;
        let Some(flow) = flows.first() else {
            return Err(Error::Pipeline(PipelineError::NoFlow(
                device.device_id.clone(),
            )));
        };

        let (conv, created) = self.conversation_for(&device, &key.phone, text, push_name).await?;

        // conv_current always mirrors the latest batch.
        let mut fields = serde_json::Map::new();
        fields.insert(
            "conv_current".into(),
            serde_json::Value::String(text.to_string()),
        );
        self.db.update_conversation(&conv.id, &fields).await?;

        let flow_type = flow_kind(flow);

        let outcome = run_guarded(self.db.as_ref(), &conv.id, flow_type, || async {
            if conv.waiting_for_reply {
                let node_id = conv
                    .current_node_id
                    .clone()
                    .filter(|id| id != "completed")
                    .ok_or_else(|| {
                        Error::Pipeline(PipelineError::Extraction(
                            "waiting conversation has no checkpoint node".to_string(),
                        ))
                    })?;

                self.executor
                    .resume(&device, flow, &conv.id, text, &node_id)
                    .await
            } else {
                // The fresh row already opens with the user's line.
                if !created {
                    append_conv_last_logged(self.db.as_ref(), &conv.id, "User", text).await;
                }

                if conv.execution_status == "completed" {
                    let mut fields = serde_json::Map::new();
                    fields.insert(
                        "execution_status".into(),
                        serde_json::Value::String("active".into()),
                    );
                    fields.insert("current_node_id".into(), serde_json::Value::Null);
                    self.db.update_conversation(&conv.id, &fields).await?;
                }

                self.executor
                    .execute(&device, flow, &conv.id, text, conv.stage.as_deref())
                    .await
            }
        })
        .await?;

        if outcome == GuardOutcome::Duplicate {
            debug!(conversation_id = %conv.id, flow_type, "Duplicate batch skipped");
        }
        Ok(())
    }
}

#[async_trait]
impl DebounceSink for MessageProcessor {
    async fn handle(&self, key: &DebounceKey, text: &str, push_name: Option<&str>) -> Result<()> {
        info!(
            device_id = %key.device_id,
            phone = %key.phone,
            chars = text.len(),
            "Processing debounced batch"
        );
        self.process_batch(key, text, push_name).await
    }
}
