//! Versioned schema migrations, applied sequentially at startup.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL UNIQUE,
            webhook_id TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL,
            instance TEXT NOT NULL DEFAULT '',
            api_key TEXT NOT NULL DEFAULT '',
            api_key_option TEXT,
            base_url TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_devices_webhook ON devices(webhook_id);

        CREATE TABLE IF NOT EXISTS flows (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            niche TEXT,
            nodes_data TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_flows_device ON flows(device_id);

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            phone TEXT NOT NULL,
            prospect_name TEXT,
            niche TEXT,
            stage TEXT,
            status TEXT,
            flow_id TEXT,
            execution_status TEXT NOT NULL DEFAULT 'active',
            current_node_id TEXT,
            waiting_for_reply INTEGER NOT NULL DEFAULT 0,
            conv_last TEXT,
            conv_current TEXT,
            alamat TEXT,
            pakej TEXT,
            no_fon TEXT,
            tarikh_gaji TEXT,
            cara_bayaran TEXT,
            peringkat_sekolah TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_device_phone
            ON conversations(device_id, phone);

        CREATE TABLE IF NOT EXISTS stage_configs (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            type_inputdata TEXT NOT NULL DEFAULT '',
            columns_data TEXT NOT NULL DEFAULT '',
            inputhardcode TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_stage_configs_device_stage
            ON stage_configs(device_id, stage);

        CREATE TABLE IF NOT EXISTS processing_locks (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            flow_type TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_locks_conversation
            ON processing_locks(conversation_id, flow_type);
    "#,
}];

/// Apply every migration newer than the recorded version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            conn.execute(
                "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
                libsql::params![migration.version, migration.name],
            )
            .await
            .map_err(|e| {
                DatabaseError::Migration(format!(
                    "Failed to record migration V{}: {e}",
                    migration.version
                ))
            })?;
        }
    }

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("Bad migration version: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Migration(format!(
            "Failed to read migration version: {e}"
        ))),
    }
}
