//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::model::{Conversation, Device, ProcessingLock, StageConfig, StoredFlow};

/// Backend-agnostic database trait covering devices, flows, conversations,
/// stage configs, and processing locks.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Devices ─────────────────────────────────────────────────────

    async fn insert_device(&self, device: &Device) -> Result<(), DatabaseError>;

    /// Look up a device by its public webhook id.
    async fn get_device_by_webhook_id(
        &self,
        webhook_id: &str,
    ) -> Result<Option<Device>, DatabaseError>;

    /// Look up a device by its gateway-side device id.
    async fn get_device_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<Device>, DatabaseError>;

    // ── Flows ───────────────────────────────────────────────────────

    async fn insert_flow(&self, flow: &StoredFlow) -> Result<(), DatabaseError>;

    /// All flows configured for a device, in insertion order.
    async fn get_flows_by_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<StoredFlow>, DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    async fn create_conversation(&self, conversation: &Conversation)
        -> Result<(), DatabaseError>;

    /// The conversation for a (device, phone) pair, if one exists.
    async fn get_conversation(
        &self,
        device_id: &str,
        phone: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    async fn get_conversation_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// Mapping-based partial update. Keys must be whitelisted columns;
    /// an unknown key fails the whole update with `ColumnNotAllowed`.
    async fn update_conversation(
        &self,
        id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), DatabaseError>;

    // ── Stage configs ───────────────────────────────────────────────

    async fn insert_stage_config(&self, config: &StageConfig) -> Result<(), DatabaseError>;

    /// The stage configuration for (device, stage), if any.
    async fn get_stage_config(
        &self,
        device_id: &str,
        stage: &str,
    ) -> Result<Option<StageConfig>, DatabaseError>;

    // ── Processing locks ────────────────────────────────────────────

    async fn insert_lock(&self, lock: &ProcessingLock) -> Result<(), DatabaseError>;

    /// Number of live locks for (conversation, flow_type).
    async fn count_locks(
        &self,
        conversation_id: &str,
        flow_type: &str,
    ) -> Result<i64, DatabaseError>;

    /// Delete a single lock row by id.
    async fn delete_lock(&self, id: &str) -> Result<(), DatabaseError>;

    /// Delete every lock for (conversation, flow_type).
    async fn delete_locks(
        &self,
        conversation_id: &str,
        flow_type: &str,
    ) -> Result<(), DatabaseError>;
}
