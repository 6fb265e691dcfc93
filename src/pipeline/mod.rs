//! Inbound message pipeline — webhook extraction and batch processing.

pub mod processor;
pub mod types;

pub use processor::MessageProcessor;
pub use types::{ExtractedMessage, clean_phone, extract_message};
