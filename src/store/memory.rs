//! In-memory `Database` backend for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::store::model::{
    CONVERSATION_UPDATE_COLUMNS, Conversation, Device, ProcessingLock, StageConfig, StoredFlow,
};
use crate::store::traits::Database;

#[derive(Default)]
struct Inner {
    devices: Vec<Device>,
    flows: Vec<StoredFlow>,
    conversations: HashMap<String, Conversation>,
    stage_configs: Vec<StageConfig>,
    locks: Vec<ProcessingLock>,
}

/// HashMap-backed store with the same semantics as the libSQL backend.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn as_opt_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn apply_field(
    conv: &mut Conversation,
    column: &str,
    value: &serde_json::Value,
) -> Result<(), DatabaseError> {
    if !CONVERSATION_UPDATE_COLUMNS.contains(&column) {
        return Err(DatabaseError::ColumnNotAllowed(column.to_string()));
    }
    match column {
        "prospect_name" => conv.prospect_name = as_opt_string(value),
        "niche" => conv.niche = as_opt_string(value),
        "stage" => conv.stage = as_opt_string(value),
        "status" => conv.status = as_opt_string(value),
        "flow_id" => conv.flow_id = as_opt_string(value),
        "execution_status" => {
            conv.execution_status = as_opt_string(value).unwrap_or_default();
        }
        "current_node_id" => conv.current_node_id = as_opt_string(value),
        "waiting_for_reply" => {
            conv.waiting_for_reply = value.as_bool().unwrap_or(false);
        }
        "conv_last" => conv.conv_last = as_opt_string(value),
        "conv_current" => conv.conv_current = as_opt_string(value),
        "alamat" => conv.alamat = as_opt_string(value),
        "pakej" => conv.pakej = as_opt_string(value),
        "no_fon" => conv.no_fon = as_opt_string(value),
        "tarikh_gaji" => conv.tarikh_gaji = as_opt_string(value),
        "cara_bayaran" => conv.cara_bayaran = as_opt_string(value),
        "peringkat_sekolah" => conv.peringkat_sekolah = as_opt_string(value),
        _ => return Err(DatabaseError::ColumnNotAllowed(column.to_string())),
    }
    Ok(())
}

#[async_trait]
impl Database for MemoryBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn insert_device(&self, device: &Device) -> Result<(), DatabaseError> {
        self.inner.write().await.devices.push(device.clone());
        Ok(())
    }

    async fn get_device_by_webhook_id(
        &self,
        webhook_id: &str,
    ) -> Result<Option<Device>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .devices
            .iter()
            .find(|d| d.webhook_id == webhook_id)
            .cloned())
    }

    async fn get_device_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<Device>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned())
    }

    async fn insert_flow(&self, flow: &StoredFlow) -> Result<(), DatabaseError> {
        self.inner.write().await.flows.push(flow.clone());
        Ok(())
    }

    async fn get_flows_by_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<StoredFlow>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .flows
            .iter()
            .filter(|f| f.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), DatabaseError> {
        self.inner
            .write()
            .await
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn get_conversation(
        &self,
        device_id: &str,
        phone: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .values()
            .find(|c| c.device_id == device_id && c.phone == phone)
            .cloned())
    }

    async fn get_conversation_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner.conversations.get(id).cloned())
    }

    async fn update_conversation(
        &self,
        id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        let conv = inner
            .conversations
            .get_mut(id)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "conversation".to_string(),
                id: id.to_string(),
            })?;
        for (column, value) in fields {
            apply_field(conv, column, value)?;
        }
        conv.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_stage_config(&self, config: &StageConfig) -> Result<(), DatabaseError> {
        self.inner.write().await.stage_configs.push(config.clone());
        Ok(())
    }

    async fn get_stage_config(
        &self,
        device_id: &str,
        stage: &str,
    ) -> Result<Option<StageConfig>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .stage_configs
            .iter()
            .find(|c| c.device_id == device_id && c.stage == stage)
            .cloned())
    }

    async fn insert_lock(&self, lock: &ProcessingLock) -> Result<(), DatabaseError> {
        self.inner.write().await.locks.push(lock.clone());
        Ok(())
    }

    async fn count_locks(
        &self,
        conversation_id: &str,
        flow_type: &str,
    ) -> Result<i64, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .locks
            .iter()
            .filter(|l| l.conversation_id == conversation_id && l.flow_type == flow_type)
            .count() as i64)
    }

    async fn delete_lock(&self, id: &str) -> Result<(), DatabaseError> {
        self.inner.write().await.locks.retain(|l| l.id != id);
        Ok(())
    }

    async fn delete_locks(
        &self,
        conversation_id: &str,
        flow_type: &str,
    ) -> Result<(), DatabaseError> {
        self.inner
            .write()
            .await
            .locks
            .retain(|l| !(l.conversation_id == conversation_id && l.flow_type == flow_type));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_applies_whitelisted_fields_only() {
        let backend = MemoryBackend::new();
        let conv = Conversation::new("dev", "601", "hi");
        backend.create_conversation(&conv).await.unwrap();

        let mut fields = serde_json::Map::new();
        fields.insert("stage".into(), serde_json::json!("intro"));
        backend.update_conversation(&conv.id, &fields).await.unwrap();

        let loaded = backend.get_conversation_by_id(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.stage.as_deref(), Some("intro"));

        let mut bad = serde_json::Map::new();
        bad.insert("phone".into(), serde_json::json!("evil"));
        assert!(matches!(
            backend.update_conversation(&conv.id, &bad).await,
            Err(DatabaseError::ColumnNotAllowed(_))
        ));
    }
}
