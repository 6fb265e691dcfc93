//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Row, params, params_from_iter};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    CONVERSATION_UPDATE_COLUMNS, Conversation, Device, ProcessingLock, StageConfig, StoredFlow,
};
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert a JSON update value into a libsql bind value.
fn json_to_value(column: &str, value: &serde_json::Value) -> Result<libsql::Value, DatabaseError> {
    match value {
        serde_json::Value::Null => Ok(libsql::Value::Null),
        serde_json::Value::Bool(b) => Ok(libsql::Value::Integer(i64::from(*b))),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(libsql::Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(libsql::Value::Real(f))
            } else {
                Err(DatabaseError::Serialization(format!(
                    "Unsupported number for column {column}: {n}"
                )))
            }
        }
        serde_json::Value::String(s) => Ok(libsql::Value::Text(s.clone())),
        other => Err(DatabaseError::Serialization(format!(
            "Unsupported value for column {column}: {other}"
        ))),
    }
}

const DEVICE_COLUMNS: &str =
    "id, device_id, webhook_id, provider, instance, api_key, api_key_option, base_url";

fn row_to_device(row: &Row) -> Result<Device, libsql::Error> {
    Ok(Device {
        id: row.get(0)?,
        device_id: row.get(1)?,
        webhook_id: row.get(2)?,
        provider: row.get(3)?,
        instance: row.get(4)?,
        api_key: row.get(5)?,
        api_key_option: row.get(6)?,
        base_url: row.get(7)?,
    })
}

const FLOW_COLUMNS: &str = "id, device_id, name, niche, nodes_data";

fn row_to_flow(row: &Row) -> Result<StoredFlow, libsql::Error> {
    Ok(StoredFlow {
        id: row.get(0)?,
        device_id: row.get(1)?,
        name: row.get(2)?,
        niche: row.get(3)?,
        nodes_data: row.get(4)?,
    })
}

const CONVERSATION_COLUMNS: &str = "id, device_id, phone, prospect_name, niche, stage, status, \
     flow_id, execution_status, current_node_id, waiting_for_reply, conv_last, conv_current, \
     alamat, pakej, no_fon, tarikh_gaji, cara_bayaran, peringkat_sekolah, created_at, updated_at";

fn row_to_conversation(row: &Row) -> Result<Conversation, libsql::Error> {
    Ok(Conversation {
        id: row.get(0)?,
        device_id: row.get(1)?,
        phone: row.get(2)?,
        prospect_name: row.get(3)?,
        niche: row.get(4)?,
        stage: row.get(5)?,
        status: row.get(6)?,
        flow_id: row.get(7)?,
        execution_status: row.get(8)?,
        current_node_id: row.get(9)?,
        waiting_for_reply: row.get::<i64>(10)? != 0,
        conv_last: row.get(11)?,
        conv_current: row.get(12)?,
        alamat: row.get(13)?,
        pakej: row.get(14)?,
        no_fon: row.get(15)?,
        tarikh_gaji: row.get(16)?,
        cara_bayaran: row.get(17)?,
        peringkat_sekolah: row.get(18)?,
        created_at: parse_datetime(&row.get::<String>(19)?),
        updated_at: parse_datetime(&row.get::<String>(20)?),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_device(&self, device: &Device) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO devices (id, device_id, webhook_id, provider, instance, api_key, api_key_option, base_url) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    device.id.clone(),
                    device.device_id.clone(),
                    device.webhook_id.clone(),
                    device.provider.clone(),
                    device.instance.clone(),
                    device.api_key.clone(),
                    device.api_key_option.clone(),
                    device.base_url.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_device: {e}")))?;
        Ok(())
    }

    async fn get_device_by_webhook_id(
        &self,
        webhook_id: &str,
    ) -> Result<Option<Device>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE webhook_id = ?1"),
                params![webhook_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_device_by_webhook_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_device(&row).map_err(|e| {
                DatabaseError::Query(format!("get_device_by_webhook_id row: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "get_device_by_webhook_id: {e}"
            ))),
        }
    }

    async fn get_device_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<Device>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = ?1"),
                params![device_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_device_by_device_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_device(&row).map_err(|e| {
                DatabaseError::Query(format!("get_device_by_device_id row: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "get_device_by_device_id: {e}"
            ))),
        }
    }

    async fn insert_flow(&self, flow: &StoredFlow) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO flows (id, device_id, name, niche, nodes_data) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    flow.id.clone(),
                    flow.device_id.clone(),
                    flow.name.clone(),
                    flow.niche.clone(),
                    flow.nodes_data.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_flow: {e}")))?;
        Ok(())
    }

    async fn get_flows_by_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<StoredFlow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {FLOW_COLUMNS} FROM flows WHERE device_id = ?1 ORDER BY created_at"
                ),
                params![device_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_flows_by_device: {e}")))?;

        let mut flows = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_flows_by_device: {e}")))?
        {
            flows.push(
                row_to_flow(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_flows_by_device row: {e}")))?,
            );
        }
        Ok(flows)
    }

    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO conversations (id, device_id, phone, prospect_name, niche, stage, \
                 status, flow_id, execution_status, current_node_id, waiting_for_reply, conv_last, \
                 conv_current, alamat, pakej, no_fon, tarikh_gaji, cara_bayaran, peringkat_sekolah, \
                 created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                params![
                    conversation.id.clone(),
                    conversation.device_id.clone(),
                    conversation.phone.clone(),
                    conversation.prospect_name.clone(),
                    conversation.niche.clone(),
                    conversation.stage.clone(),
                    conversation.status.clone(),
                    conversation.flow_id.clone(),
                    conversation.execution_status.clone(),
                    conversation.current_node_id.clone(),
                    i64::from(conversation.waiting_for_reply),
                    conversation.conv_last.clone(),
                    conversation.conv_current.clone(),
                    conversation.alamat.clone(),
                    conversation.pakej.clone(),
                    conversation.no_fon.clone(),
                    conversation.tarikh_gaji.clone(),
                    conversation.cara_bayaran.clone(),
                    conversation.peringkat_sekolah.clone(),
                    conversation.created_at.to_rfc3339(),
                    conversation.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_conversation: {e}")))?;

        debug!(conversation_id = %conversation.id, phone = %conversation.phone, "Conversation created");
        Ok(())
    }

    async fn get_conversation(
        &self,
        device_id: &str,
        phone: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE device_id = ?1 AND phone = ?2"
                ),
                params![device_id, phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row).map_err(|e| {
                DatabaseError::Query(format!("get_conversation row: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation: {e}"))),
        }
    }

    async fn get_conversation_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation_by_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row).map_err(|e| {
                DatabaseError::Query(format!("get_conversation_by_id row: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation_by_id: {e}"))),
        }
    }

    async fn update_conversation(
        &self,
        id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), DatabaseError> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut set_clauses = Vec::with_capacity(fields.len() + 1);
        let mut values: Vec<libsql::Value> = Vec::with_capacity(fields.len() + 2);

        for (column, value) in fields {
            if !CONVERSATION_UPDATE_COLUMNS.contains(&column.as_str()) {
                return Err(DatabaseError::ColumnNotAllowed(column.clone()));
            }
            set_clauses.push(format!("{column} = ?{}", values.len() + 1));
            values.push(json_to_value(column, value)?);
        }

        set_clauses.push(format!("updated_at = ?{}", values.len() + 1));
        values.push(libsql::Value::Text(Utc::now().to_rfc3339()));

        let sql = format!(
            "UPDATE conversations SET {} WHERE id = ?{}",
            set_clauses.join(", "),
            values.len() + 1
        );
        values.push(libsql::Value::Text(id.to_string()));

        self.conn()
            .execute(&sql, params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("update_conversation: {e}")))?;

        debug!(conversation_id = %id, fields = fields.len(), "Conversation updated");
        Ok(())
    }

    async fn insert_stage_config(&self, config: &StageConfig) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO stage_configs (id, device_id, stage, type_inputdata, columns_data, inputhardcode) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    config.id.clone(),
                    config.device_id.clone(),
                    config.stage.clone(),
                    config.type_inputdata.clone(),
                    config.columns_data.clone(),
                    config.inputhardcode.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_stage_config: {e}")))?;
        Ok(())
    }

    async fn get_stage_config(
        &self,
        device_id: &str,
        stage: &str,
    ) -> Result<Option<StageConfig>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, device_id, stage, type_inputdata, columns_data, inputhardcode \
                 FROM stage_configs WHERE device_id = ?1 AND stage = ?2",
                params![device_id, stage],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_stage_config: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(StageConfig {
                id: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_stage_config row: {e}")))?,
                device_id: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("get_stage_config row: {e}")))?,
                stage: row
                    .get(2)
                    .map_err(|e| DatabaseError::Query(format!("get_stage_config row: {e}")))?,
                type_inputdata: row
                    .get(3)
                    .map_err(|e| DatabaseError::Query(format!("get_stage_config row: {e}")))?,
                columns_data: row
                    .get(4)
                    .map_err(|e| DatabaseError::Query(format!("get_stage_config row: {e}")))?,
                inputhardcode: row
                    .get(5)
                    .map_err(|e| DatabaseError::Query(format!("get_stage_config row: {e}")))?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_stage_config: {e}"))),
        }
    }

    async fn insert_lock(&self, lock: &ProcessingLock) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO processing_locks (id, conversation_id, flow_type, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    lock.id.clone(),
                    lock.conversation_id.clone(),
                    lock.flow_type.clone(),
                    lock.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_lock: {e}")))?;
        Ok(())
    }

    async fn count_locks(
        &self,
        conversation_id: &str,
        flow_type: &str,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM processing_locks \
                 WHERE conversation_id = ?1 AND flow_type = ?2",
                params![conversation_id, flow_type],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_locks: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("count_locks row: {e}"))),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_locks: {e}"))),
        }
    }

    async fn delete_lock(&self, id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM processing_locks WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_lock: {e}")))?;
        Ok(())
    }

    async fn delete_locks(
        &self,
        conversation_id: &str,
        flow_type: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM processing_locks WHERE conversation_id = ?1 AND flow_type = ?2",
                params![conversation_id, flow_type],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_locks: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        backend.run_migrations().await.unwrap();
        backend.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn conversation_round_trip_and_update() {
        let backend = LibSqlBackend::new_memory().await.unwrap();

        let conv = Conversation::new("dev-1", "60123456789", "hello");
        backend.create_conversation(&conv).await.unwrap();

        let loaded = backend
            .get_conversation("dev-1", "60123456789")
            .await
            .unwrap()
            .expect("conversation exists");
        assert_eq!(loaded.conv_last.as_deref(), Some("User: hello"));
        assert!(!loaded.waiting_for_reply);

        let mut fields = serde_json::Map::new();
        fields.insert("stage".into(), serde_json::json!("qualified"));
        fields.insert("waiting_for_reply".into(), serde_json::json!(true));
        backend.update_conversation(&conv.id, &fields).await.unwrap();

        let loaded = backend
            .get_conversation_by_id(&conv.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.stage.as_deref(), Some("qualified"));
        assert!(loaded.waiting_for_reply);
    }

    #[tokio::test]
    async fn update_rejects_unknown_column() {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        let conv = Conversation::new("dev-1", "601", "hi");
        backend.create_conversation(&conv).await.unwrap();

        let mut fields = serde_json::Map::new();
        fields.insert("id".into(), serde_json::json!("evil"));
        let err = backend.update_conversation(&conv.id, &fields).await;
        assert!(matches!(err, Err(DatabaseError::ColumnNotAllowed(_))));
    }

    #[tokio::test]
    async fn local_file_persists_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatflow.db");

        {
            let backend = LibSqlBackend::new_local(&path).await.unwrap();
            let conv = Conversation::new("dev-1", "601", "hello");
            backend.create_conversation(&conv).await.unwrap();
        }

        let backend = LibSqlBackend::new_local(&path).await.unwrap();
        let loaded = backend.get_conversation("dev-1", "601").await.unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn lock_insert_count_delete() {
        let backend = LibSqlBackend::new_memory().await.unwrap();

        let lock = ProcessingLock::new("conv-1", "whatsapp_bot");
        backend.insert_lock(&lock).await.unwrap();
        assert_eq!(backend.count_locks("conv-1", "whatsapp_bot").await.unwrap(), 1);
        assert_eq!(backend.count_locks("conv-1", "chatbot_ai").await.unwrap(), 0);

        backend.delete_locks("conv-1", "whatsapp_bot").await.unwrap();
        assert_eq!(backend.count_locks("conv-1", "whatsapp_bot").await.unwrap(), 0);
    }
}
