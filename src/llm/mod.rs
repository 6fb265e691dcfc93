//! Completion service — chat-completion calls for AI prompt nodes.
//!
//! Model and API key come from the device row, so every request carries
//! its own credentials instead of binding them to the client.

pub mod openrouter;
pub mod retry;

pub use openrouter::OpenRouterClient;
pub use retry::{FALLBACK_REPLY, complete_with_retry};

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::LlmError;

/// One chat-completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt, already assembled by the caller.
    pub system_prompt: String,
    /// Conversation transcript so far ("User: ...\nBot: ..." lines).
    pub history: String,
    /// The user's latest message.
    pub user_text: String,
    pub model: String,
    pub api_key: SecretString,
}

/// A chat-completion backend. Returns the raw assistant message text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}
