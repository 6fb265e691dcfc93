//! Row types for the persistence layer.

use chrono::{DateTime, Utc};

/// A registered WhatsApp device (one gateway account).
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    /// Gateway-side device identifier (used when sending).
    pub device_id: String,
    /// Public webhook path segment for inbound messages.
    pub webhook_id: String,
    /// Gateway name: "waha", "wablas", or "whacenter".
    pub provider: String,
    /// Gateway instance (host or tenant) the device belongs to.
    pub instance: String,
    pub api_key: String,
    /// Optional model identifier for AI-driven flows.
    pub api_key_option: Option<String>,
    pub base_url: Option<String>,
}

/// A flow definition as stored: raw JSON in `nodes_data`.
#[derive(Debug, Clone)]
pub struct StoredFlow {
    pub id: String,
    pub device_id: String,
    pub name: String,
    pub niche: Option<String>,
    pub nodes_data: String,
}

/// Per-contact conversation state. One row per (device, phone).
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub device_id: String,
    pub phone: String,
    pub prospect_name: Option<String>,
    pub niche: Option<String>,
    pub stage: Option<String>,
    pub status: Option<String>,
    pub flow_id: Option<String>,
    /// "active" or "completed".
    pub execution_status: String,
    /// Checkpoint node id, or "completed" after the flow finishes.
    pub current_node_id: Option<String>,
    pub waiting_for_reply: bool,
    /// Append-only transcript: "User: ...\nBot: ..." lines.
    pub conv_last: Option<String>,
    pub conv_current: Option<String>,
    pub alamat: Option<String>,
    pub pakej: Option<String>,
    pub no_fon: Option<String>,
    pub tarikh_gaji: Option<String>,
    pub cara_bayaran: Option<String>,
    pub peringkat_sekolah: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Fresh conversation row for a first-time contact.
    pub fn new(device_id: &str, phone: &str, first_message: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            phone: phone.to_string(),
            prospect_name: None,
            niche: None,
            stage: None,
            status: None,
            flow_id: None,
            execution_status: "active".to_string(),
            current_node_id: None,
            waiting_for_reply: false,
            conv_last: Some(format!("User: {first_message}")),
            conv_current: None,
            alamat: None,
            pakej: None,
            no_fon: None,
            tarikh_gaji: None,
            cara_bayaran: None,
            peringkat_sekolah: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-device stage configuration: what to write when a stage node fires.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub id: String,
    pub device_id: String,
    pub stage: String,
    /// "Set" writes `inputhardcode`; "Input" writes the last user reply.
    pub type_inputdata: String,
    /// UI-facing column name, normalized before the write.
    pub columns_data: String,
    pub inputhardcode: String,
}

/// A processing-lock row claimed by one in-flight flow invocation.
#[derive(Debug, Clone)]
pub struct ProcessingLock {
    pub id: String,
    pub conversation_id: String,
    pub flow_type: String,
    pub created_at: DateTime<Utc>,
}

impl ProcessingLock {
    pub fn new(conversation_id: &str, flow_type: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            flow_type: flow_type.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Conversation columns that mapping-based updates may touch.
///
/// Anything outside this list is rejected before SQL is built.
pub const CONVERSATION_UPDATE_COLUMNS: &[&str] = &[
    "prospect_name",
    "niche",
    "stage",
    "status",
    "flow_id",
    "execution_status",
    "current_node_id",
    "waiting_for_reply",
    "conv_last",
    "conv_current",
    "alamat",
    "pakej",
    "no_fon",
    "tarikh_gaji",
    "cara_bayaran",
    "peringkat_sekolah",
];
