//! Chatflow — WhatsApp conversation flow automation core.

pub mod config;
pub mod debounce;
pub mod error;
pub mod flow;
pub mod guard;
pub mod llm;
pub mod pipeline;
pub mod provider;
pub mod server;
pub mod store;
