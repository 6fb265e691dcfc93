//! Delay and waiting processors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::flow::model::FlowNode;
use crate::flow::processors::{Invocation, NodeOutcome, NodeProcessor};
use crate::store::traits::Database;

const DEFAULT_DELAY_SECS: f64 = 3.0;
const DEFAULT_WAITING_TIMES_SECS: f64 = 8.0;

/// Pause execution for `config.delay` seconds, then continue.
pub struct DelayProcessor;

#[async_trait]
impl NodeProcessor for DelayProcessor {
    async fn process(&self, _inv: &Invocation, node: &FlowNode) -> Result<NodeOutcome> {
        let secs = node.config_f64("delay").unwrap_or(DEFAULT_DELAY_SECS);
        debug!(node_id = %node.id, secs, "Delaying");
        tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
        Ok(NodeOutcome::Continue)
    }
}

/// Checkpoint and park the flow until the next inbound message.
pub struct WaitingReplyProcessor {
    db: Arc<dyn Database>,
}

impl WaitingReplyProcessor {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NodeProcessor for WaitingReplyProcessor {
    async fn process(&self, inv: &Invocation, node: &FlowNode) -> Result<NodeOutcome> {
        let mut fields = serde_json::Map::new();
        fields.insert("waiting_for_reply".into(), serde_json::Value::Bool(true));
        fields.insert(
            "current_node_id".into(),
            serde_json::Value::String(node.id.clone()),
        );
        self.db
            .update_conversation(&inv.conversation_id, &fields)
            .await?;

        info!(node_id = %node.id, conversation_id = %inv.conversation_id, "Waiting for user reply");
        Ok(NodeOutcome::Stop)
    }
}

/// Timed pause. Sleeps for `config.delay` seconds and continues whether
/// or not the user replied in the meantime.
pub struct WaitingTimesProcessor;

#[async_trait]
impl NodeProcessor for WaitingTimesProcessor {
    async fn process(&self, _inv: &Invocation, node: &FlowNode) -> Result<NodeOutcome> {
        let secs = node
            .config_f64("delay")
            .unwrap_or(DEFAULT_WAITING_TIMES_SECS);
        debug!(node_id = %node.id, secs, "Timed wait");
        tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
        Ok(NodeOutcome::Continue)
    }
}
