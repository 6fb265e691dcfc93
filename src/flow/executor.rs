//! Flow execution engine.
//!
//! Runs a parsed flow as an explicit loop: process the current node,
//! route to the next one, stop on a waiting node or when no edge is
//! left. A step cap bounds cyclic graphs.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{Error, FlowError, Result};
use crate::flow::model::{FlowDefinition, FlowNode};
use crate::flow::processors::{Invocation, NodeOutcome, ProcessorRegistry, append_conv_last_logged};
use crate::flow::router;
use crate::llm::CompletionService;
use crate::provider::ProviderRegistry;
use crate::store::model::{Device, StoredFlow};
use crate::store::traits::Database;

pub struct FlowExecutor {
    db: Arc<dyn Database>,
    processors: ProcessorRegistry,
    max_steps: usize,
}

impl FlowExecutor {
    pub fn new(
        db: Arc<dyn Database>,
        providers: Arc<ProviderRegistry>,
        completions: Arc<dyn CompletionService>,
        config: &AppConfig,
    ) -> Self {
        let processors = ProcessorRegistry::build(
            db.clone(),
            providers,
            completions,
            config.completion_retries,
            config.completion_backoff,
        );
        Self {
            db,
            processors,
            max_steps: config.max_flow_steps,
        }
    }

    /// Start a fresh execution at the flow's starting node.
    ///
    /// `stage_hint` biases the starting node: a hint matching a node id
    /// starts there, otherwise the default start rules apply.
    pub async fn execute(
        &self,
        device: &Device,
        flow: &StoredFlow,
        conversation_id: &str,
        user_message: &str,
        stage_hint: Option<&str>,
    ) -> Result<()> {
        let def = FlowDefinition::parse(&flow.nodes_data).map_err(Error::Flow)?;

        let start = def
            .resolve_start(stage_hint)
            .ok_or(Error::Flow(FlowError::NoStartNode))?;
        info!(
            flow_id = %flow.id,
            conversation_id,
            start_node = %start.id,
            "Starting flow execution"
        );

        let inv = Invocation {
            device: device.clone(),
            conversation_id: conversation_id.to_string(),
            user_message: user_message.to_string(),
        };
        self.run_from(&def, start, &inv).await
    }

    /// Resume a parked execution after an inbound reply.
    ///
    /// The user's text is appended to the transcript before the edge out
    /// of the checkpointed node is evaluated.
    pub async fn resume(
        &self,
        device: &Device,
        flow: &StoredFlow,
        conversation_id: &str,
        user_message: &str,
        current_node_id: &str,
    ) -> Result<()> {
        let def = FlowDefinition::parse(&flow.nodes_data).map_err(Error::Flow)?;

        let current = def
            .node(current_node_id)
            .ok_or_else(|| Error::Flow(FlowError::NodeNotFound(current_node_id.to_string())))?;
        info!(
            flow_id = %flow.id,
            conversation_id,
            node_id = %current.id,
            "Resuming flow execution"
        );

        // The checkpoint resolved; only now does the conversation stop
        // waiting. A failed lookup above leaves it parked for a retry.
        let mut fields = serde_json::Map::new();
        fields.insert("waiting_for_reply".into(), serde_json::Value::Bool(false));
        self.db.update_conversation(conversation_id, &fields).await?;

        if !user_message.is_empty() {
            append_conv_last_logged(self.db.as_ref(), conversation_id, "User", user_message)
                .await;
        }

        let inv = Invocation {
            device: device.clone(),
            conversation_id: conversation_id.to_string(),
            user_message: user_message.to_string(),
        };

        let mut rng = StdRng::from_entropy();
        match router::next_node(&def, current, user_message, &mut rng) {
            Some(next) => self.run_from(&def, next, &inv).await,
            None => self.mark_completed(conversation_id).await,
        }
    }

    async fn run_from(
        &self,
        def: &FlowDefinition,
        start: &FlowNode,
        inv: &Invocation,
    ) -> Result<()> {
        let mut rng = StdRng::from_entropy();
        let mut current = start;

        for _ in 0..self.max_steps {
            debug!(node_id = %current.id, node_type = ?current.node_type, "Executing node");

            let outcome = match self.processors.get(current.node_type) {
                Some(processor) => {
                    processor
                        .process(inv, current)
                        .await
                        .map_err(|e| FlowError::NodeFailed {
                            node_id: current.id.clone(),
                            source: Box::new(e),
                        })?
                }
                // start, conditions, and unknown node types pass through.
                None => {
                    debug!(node_id = %current.id, "No processor for node type, passing through");
                    NodeOutcome::Continue
                }
            };

            if outcome == NodeOutcome::Stop {
                info!(node_id = %current.id, "Flow paused");
                return Ok(());
            }

            match router::next_node(def, current, &inv.user_message, &mut rng) {
                Some(next) => current = next,
                None => {
                    return self.mark_completed(&inv.conversation_id).await;
                }
            }
        }

        warn!(max = self.max_steps, "Flow exceeded step limit");
        Err(Error::Flow(FlowError::StepLimitExceeded {
            max: self.max_steps,
        }))
    }

    async fn mark_completed(&self, conversation_id: &str) -> Result<()> {
        let mut fields = serde_json::Map::new();
        fields.insert(
            "execution_status".into(),
            serde_json::Value::String("completed".into()),
        );
        fields.insert(
            "current_node_id".into(),
            serde_json::Value::String("completed".into()),
        );
        fields.insert("waiting_for_reply".into(), serde_json::Value::Bool(false));
        self.db.update_conversation(conversation_id, &fields).await?;
        info!(conversation_id, "Flow completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::{LlmError, ProviderError};
    use crate::llm::CompletionRequest;
    use crate::provider::{MediaType, ProviderSender};
    use crate::store::MemoryBackend;
    use crate::store::model::Conversation;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProviderSender for RecordingSender {
        async fn send_text(
            &self,
            _phone: &str,
            text: &str,
        ) -> std::result::Result<String, ProviderError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(String::new())
        }

        async fn send_media(
            &self,
            _phone: &str,
            _media: MediaType,
            url: &str,
        ) -> std::result::Result<String, ProviderError> {
            self.sent.lock().unwrap().push(url.to_string());
            Ok(String::new())
        }
    }

    struct NoCompletions;

    #[async_trait]
    impl CompletionService for NoCompletions {
        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> std::result::Result<String, LlmError> {
            Err(LlmError::RequestFailed {
                reason: "not wired in this test".to_string(),
            })
        }
    }

    struct Harness {
        db: Arc<MemoryBackend>,
        sender: Arc<RecordingSender>,
        executor: FlowExecutor,
        device: Device,
    }

    async fn harness() -> Harness {
        let db = Arc::new(MemoryBackend::new());
        let sender = Arc::new(RecordingSender::default());
        let providers = Arc::new(ProviderRegistry::new());
        providers.register("waha", "inst", sender.clone()).await;

        let device = Device {
            id: "1".into(),
            device_id: "dev".into(),
            webhook_id: "hook".into(),
            provider: "waha".into(),
            instance: "inst".into(),
            api_key: String::new(),
            api_key_option: None,
            base_url: None,
        };

        let config = AppConfig {
            max_flow_steps: 16,
            ..AppConfig::default()
        };
        let executor = FlowExecutor::new(
            db.clone() as Arc<dyn Database>,
            providers,
            Arc::new(NoCompletions),
            &config,
        );

        Harness {
            db,
            sender,
            executor,
            device,
        }
    }

    fn flow(nodes_data: &str) -> StoredFlow {
        StoredFlow {
            id: "flow-1".into(),
            device_id: "dev".into(),
            name: "greeting".into(),
            niche: None,
            nodes_data: nodes_data.to_string(),
        }
    }

    const GREETING_FLOW: &str = r#"{
        "nodes": [
            {"id": "greet", "type": "send_message", "config": {"text": "Selamat datang!"}},
            {"id": "ask", "type": "send_message", "config": {"text": "Berminat?"}},
            {"id": "wait", "type": "waiting_reply"},
            {"id": "cond", "type": "conditions"},
            {"id": "yes", "type": "send_message", "config": {"text": "Bagus!"}},
            {"id": "no", "type": "send_message", "config": {"text": "Baiklah."}}
        ],
        "connections": [
            {"from": "greet", "to": "ask"},
            {"from": "ask", "to": "wait"},
            {"from": "wait", "to": "cond"},
            {"from": "cond", "to": "yes", "conditionType": "contains", "conditionValue": "ya"},
            {"from": "cond", "to": "no", "conditionType": "default", "conditionValue": "x"}
        ]
    }"#;

    #[tokio::test]
    async fn fresh_run_pauses_at_waiting_node() {
        let h = harness().await;
        let conv = Conversation::new("dev", "601", "hello");
        h.db.create_conversation(&conv).await.unwrap();

        h.executor
            .execute(&h.device, &flow(GREETING_FLOW), &conv.id, "hello", None)
            .await
            .unwrap();

        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent, vec!["Selamat datang!", "Berminat?"]);

        let loaded = h.db.get_conversation_by_id(&conv.id).await.unwrap().unwrap();
        assert!(loaded.waiting_for_reply);
        assert_eq!(loaded.current_node_id.as_deref(), Some("wait"));
        assert_eq!(loaded.execution_status, "active");
    }

    #[tokio::test]
    async fn resume_appends_reply_and_routes_to_completion() {
        let h = harness().await;
        let mut conv = Conversation::new("dev", "601", "hello");
        conv.waiting_for_reply = true;
        conv.current_node_id = Some("wait".to_string());
        conv.conv_last = Some("User: hello\nBot: Berminat?".to_string());
        h.db.create_conversation(&conv).await.unwrap();

        h.executor
            .resume(&h.device, &flow(GREETING_FLOW), &conv.id, "ya boleh", "wait")
            .await
            .unwrap();

        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent, vec!["Bagus!"]);

        let loaded = h.db.get_conversation_by_id(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.execution_status, "completed");
        assert_eq!(loaded.current_node_id.as_deref(), Some("completed"));
        assert!(!loaded.waiting_for_reply);
        let transcript = loaded.conv_last.unwrap();
        assert!(transcript.contains("User: ya boleh"));
        assert!(transcript.ends_with("Bot: Bagus!"));
    }

    #[tokio::test]
    async fn resume_takes_default_branch_on_no_match() {
        let h = harness().await;
        let conv = Conversation::new("dev", "601", "hello");
        h.db.create_conversation(&conv).await.unwrap();

        h.executor
            .resume(&h.device, &flow(GREETING_FLOW), &conv.id, "tak nak", "wait")
            .await
            .unwrap();

        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent, vec!["Baiklah."]);
    }

    #[tokio::test]
    async fn missing_resume_node_is_fatal_and_keeps_waiting_state() {
        let h = harness().await;
        let mut conv = Conversation::new("dev", "601", "hello");
        conv.waiting_for_reply = true;
        conv.current_node_id = Some("vanished".to_string());
        h.db.create_conversation(&conv).await.unwrap();

        let err = h
            .executor
            .resume(&h.device, &flow(GREETING_FLOW), &conv.id, "hi", "vanished")
            .await;
        assert!(matches!(
            err,
            Err(Error::Flow(FlowError::NodeNotFound(id))) if id == "vanished"
        ));

        // The checkpoint never resolved, so the conversation stays parked.
        let loaded = h.db.get_conversation_by_id(&conv.id).await.unwrap().unwrap();
        assert!(loaded.waiting_for_reply);
        assert_eq!(loaded.current_node_id.as_deref(), Some("vanished"));
    }

    #[tokio::test]
    async fn cyclic_flow_hits_step_limit() {
        let h = harness().await;
        let conv = Conversation::new("dev", "601", "hello");
        h.db.create_conversation(&conv).await.unwrap();

        let cyclic = r#"{
            "nodes": [
                {"id": "a", "type": "stage", "config": {"value": "loop"}},
                {"id": "b", "type": "stage", "config": {"value": "loop"}}
            ],
            "connections": [
                {"from": "a", "to": "b"},
                {"from": "b", "to": "a"}
            ]
        }"#;

        let err = h
            .executor
            .execute(&h.device, &flow(cyclic), &conv.id, "hi", None)
            .await;
        assert!(matches!(
            err,
            Err(Error::Flow(FlowError::StepLimitExceeded { max: 16 }))
        ));
    }

    #[tokio::test]
    async fn malformed_definition_aborts_without_state_changes() {
        let h = harness().await;
        let conv = Conversation::new("dev", "601", "hello");
        h.db.create_conversation(&conv).await.unwrap();

        let err = h
            .executor
            .execute(&h.device, &flow("{broken"), &conv.id, "hi", None)
            .await;
        assert!(matches!(
            err,
            Err(Error::Flow(FlowError::InvalidDefinition(_)))
        ));
        assert!(h.sender.sent.lock().unwrap().is_empty());

        let loaded = h.db.get_conversation_by_id(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.execution_status, "active");
        assert!(loaded.current_node_id.is_none());
    }

    #[tokio::test]
    async fn stage_hint_starts_mid_flow() {
        let h = harness().await;
        let conv = Conversation::new("dev", "601", "hello");
        h.db.create_conversation(&conv).await.unwrap();

        // Hint matches the "ask" node id, so the greeting is skipped.
        h.executor
            .execute(&h.device, &flow(GREETING_FLOW), &conv.id, "hello", Some("ask"))
            .await
            .unwrap();

        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent, vec!["Berminat?"]);
    }
}
