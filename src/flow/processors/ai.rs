//! AI prompt processor — asks the completion service for the next reply
//! and relays each response part over WhatsApp.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{DatabaseError, Result};
use crate::flow::model::FlowNode;
use crate::flow::processors::{
    Invocation, NodeOutcome, NodeProcessor, append_conv_last_logged,
};
use crate::llm::{CompletionRequest, CompletionService, FALLBACK_REPLY, complete_with_retry};
use crate::provider::{MediaType, ProviderRegistry};
use crate::store::traits::Database;

/// Stage assigned when the model answers in plain text.
const DEFAULT_STAGE: &str = "Problem Identification";

const RESPONSE_INSTRUCTIONS: &str = "\n\n### Instructions:\n\
Reply as JSON: {\"Stage\": \"<current stage>\", \"Response\": [{\"type\": \"text\", \"content\": \"...\"}]}.\n\
1. If the current stage is null or undefined, default to the first stage.\n\
2. Text parts that belong in one WhatsApp bubble carry \"Jenis\": \"onemessage\".\n\
3. Non-text types like `image` put the media URL in `content` and never include the `Jenis` field.\n";

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^```json|```$").unwrap());
static LEGACY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Stage:\s*(.+?)\nResponse:\s*(\[.*?\])$").unwrap());

/// One part of a structured model reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplyPart {
    #[serde(rename = "type", default)]
    pub part_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "Jenis", default)]
    pub jenis: String,
}

#[derive(Debug, Deserialize)]
struct StructuredReply {
    #[serde(rename = "Stage", default)]
    stage: String,
    #[serde(rename = "Response", default)]
    parts: Vec<ReplyPart>,
}

/// Parse a raw model reply into a stage and response parts.
///
/// Tries the structured JSON shape (with code fences stripped), then the
/// legacy `Stage:/Response:` text form, then falls back to a single text
/// part with the default stage.
pub fn parse_reply(raw: &str) -> (String, Vec<ReplyPart>) {
    let sanitized = FENCE_RE.replace_all(raw.trim(), "").to_string();

    if let Ok(reply) = serde_json::from_str::<StructuredReply>(&sanitized) {
        if !reply.stage.is_empty() && !reply.parts.is_empty() {
            return (reply.stage, reply.parts);
        }
    }

    if let Some(caps) = LEGACY_RE.captures(raw) {
        let stage = caps[1].trim().to_string();
        if let Ok(parts) = serde_json::from_str::<Vec<ReplyPart>>(&caps[2]) {
            if !parts.is_empty() {
                return (stage, parts);
            }
        }
    }

    (
        DEFAULT_STAGE.to_string(),
        vec![ReplyPart {
            part_type: "text".to_string(),
            content: raw.trim().to_string(),
            jenis: String::new(),
        }],
    )
}

/// Merge runs of consecutive `onemessage` text parts into one bubble.
pub fn group_parts(parts: Vec<ReplyPart>) -> Vec<ReplyPart> {
    let mut grouped: Vec<ReplyPart> = Vec::with_capacity(parts.len());
    let mut pending: Vec<String> = Vec::new();

    let flush = |pending: &mut Vec<String>, grouped: &mut Vec<ReplyPart>| {
        if !pending.is_empty() {
            grouped.push(ReplyPart {
                part_type: "text".to_string(),
                content: pending.join("\n"),
                jenis: String::new(),
            });
            pending.clear();
        }
    };

    for part in parts {
        if part.part_type.is_empty() || part.content.is_empty() {
            continue;
        }
        if part.part_type == "text" && part.jenis == "onemessage" {
            pending.push(part.content);
        } else {
            flush(&mut pending, &mut grouped);
            grouped.push(part);
        }
    }
    flush(&mut pending, &mut grouped);
    grouped
}

pub struct AiPromptProcessor {
    db: Arc<dyn Database>,
    providers: Arc<ProviderRegistry>,
    completions: Arc<dyn CompletionService>,
    retries: u32,
    backoff: Duration,
}

impl AiPromptProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        providers: Arc<ProviderRegistry>,
        completions: Arc<dyn CompletionService>,
        retries: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            db,
            providers,
            completions,
            retries,
            backoff,
        }
    }
}

#[async_trait]
impl NodeProcessor for AiPromptProcessor {
    async fn process(&self, inv: &Invocation, node: &FlowNode) -> Result<NodeOutcome> {
        let Some(prompt) = node.config_str("text") else {
            warn!(node_id = %node.id, "No prompt configured for AI node");
            return Ok(NodeOutcome::Continue);
        };

        let Some(model) = inv.device.api_key_option.as_deref().filter(|m| !m.is_empty())
        else {
            warn!(device_id = %inv.device.device_id, "No model configured for AI node");
            return Ok(NodeOutcome::Continue);
        };
        if inv.device.api_key.is_empty() {
            warn!(device_id = %inv.device.device_id, "No API key configured for AI node");
            return Ok(NodeOutcome::Continue);
        }

        let conv = self
            .db
            .get_conversation_by_id(&inv.conversation_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "conversation".to_string(),
                id: inv.conversation_id.clone(),
            })?;

        let request = CompletionRequest {
            system_prompt: format!("{prompt}{RESPONSE_INSTRUCTIONS}"),
            history: conv.conv_last.clone().unwrap_or_default(),
            user_text: inv.user_message.clone(),
            model: model.to_string(),
            api_key: inv.device.api_key.clone().into(),
        };

        let raw = match complete_with_retry(
            self.completions.as_ref(),
            &request,
            self.retries,
            self.backoff,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Completion failed, using fallback reply");
                FALLBACK_REPLY.to_string()
            }
        };

        let (stage, parts) = parse_reply(&raw);
        info!(stage = %stage, parts = parts.len(), "AI reply parsed");

        if !stage.is_empty() {
            let mut fields = serde_json::Map::new();
            fields.insert("stage".into(), serde_json::Value::String(stage));
            if let Err(e) = self.db.update_conversation(&inv.conversation_id, &fields).await {
                warn!(error = %e, "Failed to update stage from AI reply");
            }
        }

        let sender = self.providers.sender_for(&inv.device).await?;
        for part in group_parts(parts) {
            match part.part_type.as_str() {
                "text" => {
                    if let Err(e) = sender.send_text(&conv.phone, &part.content).await {
                        warn!(error = %e, "Failed to send AI text part");
                    } else {
                        append_conv_last_logged(
                            self.db.as_ref(),
                            &inv.conversation_id,
                            "Bot",
                            &part.content,
                        )
                        .await;
                    }
                }
                "image" | "audio" | "video" => {
                    let media = match part.part_type.as_str() {
                        "image" => MediaType::Image,
                        "audio" => MediaType::Audio,
                        _ => MediaType::Video,
                    };
                    let url = part.content.trim();
                    if let Err(e) = sender.send_media(&conv.phone, media, url).await {
                        warn!(error = %e, "Failed to send AI media part");
                    } else {
                        append_conv_last_logged(
                            self.db.as_ref(),
                            &inv.conversation_id,
                            "Bot",
                            url,
                        )
                        .await;
                    }
                }
                other => warn!(part_type = other, "Unknown AI reply part type"),
            }
        }

        Ok(NodeOutcome::Continue)
    }
}
