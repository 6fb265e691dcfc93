//! Error types for Chatflow.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Column not allowed in update: {0}")]
    ColumnNotAllowed(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// WhatsApp provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} send to {phone} failed: {reason}")]
    SendFailed {
        provider: String,
        phone: String,
        reason: String,
    },

    #[error("Invalid response from provider {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("No provider registered for {provider}/{instance}")]
    NotRegistered { provider: String, instance: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Completion service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Completion request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Invalid completion response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Completion exhausted {attempts} attempts over {elapsed:?}")]
    RetriesExhausted { attempts: u32, elapsed: Duration },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flow execution errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Flow has no nodes configured")]
    EmptyDefinition,

    #[error("Failed to parse flow definition: {0}")]
    InvalidDefinition(String),

    #[error("No starting node found")]
    NoStartNode,

    #[error("Current node not found in flow: {0}")]
    NodeNotFound(String),

    #[error("Flow exceeded {max} steps without reaching a waiting node")]
    StepLimitExceeded { max: usize },

    #[error("Node {node_id} failed: {source}")]
    NodeFailed {
        node_id: String,
        #[source]
        source: Box<Error>,
    },
}

/// Inbound pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Device not found for webhook id: {0}")]
    DeviceNotFound(String),

    #[error("No flow configured for device: {0}")]
    NoFlow(String),

    #[error("Message extraction failed: {0}")]
    Extraction(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
