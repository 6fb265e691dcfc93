//! Stage processor — updates the funnel stage and optionally writes a
//! customer-data column from the per-device stage configuration.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{DatabaseError, Result};
use crate::flow::model::FlowNode;
use crate::flow::processors::{Invocation, NodeOutcome, NodeProcessor};
use crate::store::traits::Database;

pub struct StageProcessor {
    db: Arc<dyn Database>,
}

impl StageProcessor {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NodeProcessor for StageProcessor {
    async fn process(&self, inv: &Invocation, node: &FlowNode) -> Result<NodeOutcome> {
        let Some(stage_name) = node.config_str("value") else {
            warn!(node_id = %node.id, "No stage value configured");
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

        let mut fields = serde_json::Map::new();
        fields.insert(
            "stage".into(),
            serde_json::Value::String(stage_name.to_string()),
        );

        // Query failure falls back to a plain stage update.
        let stage_config = match self.db.get_stage_config(&conv.device_id, stage_name).await {
            Ok(config) => config,
            Err(e) => {
                warn!(stage = stage_name, error = %e, "Stage config lookup failed");
                None
            }
        };

        if let Some(config) = stage_config {
            let column = normalize_column_name(&config.columns_data);
            let value = match config.type_inputdata.as_str() {
                "Set" => Some(config.inputhardcode.clone()),
                "Input" => {
                    let reply = conv
                        .conv_last
                        .as_deref()
                        .and_then(last_user_line)
                        .unwrap_or_default();
                    Some(reply)
                }
                other => {
                    warn!(type_inputdata = other, "Unknown stage input type, skipping column");
                    None
                }
            };

            if let Some(value) = value {
                debug!(column = %column, value = %value, "Stage column write");
                fields.insert(column, serde_json::Value::String(value));
            }
        }

        self.db
            .update_conversation(&inv.conversation_id, &fields)
            .await?;
        info!(stage = stage_name, conversation_id = %inv.conversation_id, "Stage updated");
        Ok(NodeOutcome::Continue)
    }
}

/// Map a UI column label to its conversation column.
///
/// Unmapped labels are lowercased with spaces turned into underscores.
pub fn normalize_column_name(column_name: &str) -> String {
    match column_name {
        "Nama" => "prospect_name".to_string(),
        "Alamat" => "alamat".to_string(),
        "Pakej" => "pakej".to_string(),
        "No Fon" => "no_fon".to_string(),
        "Tarikh Gaji" => "tarikh_gaji".to_string(),
        "Cara Bayaran" => "cara_bayaran".to_string(),
        "Peringkat Sekolah" => "peringkat_sekolah".to_string(),
        other => other.to_lowercase().replace(' ', "_"),
    }
}

/// The most recent `"User: "` line in a transcript, scanned from the end.
pub fn last_user_line(conv_last: &str) -> Option<String> {
    conv_last
        .lines()
        .rev()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("User: ").map(String::from))
}
