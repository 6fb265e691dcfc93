//! Retry wrapper around the completion service.

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::error::LlmError;
use crate::llm::{CompletionRequest, CompletionService};

/// Canned reply used when every completion attempt fails. The user
/// always gets an answer even if the model is down.
pub const FALLBACK_REPLY: &str =
    "Maaf, sistem sedang sibuk buat masa ini. Boleh cuba hantar mesej sekali lagi sebentar nanti?";

/// Call the completion service with up to `retries` retries after the
/// first failure, waiting `attempt * backoff` between attempts.
pub async fn complete_with_retry(
    service: &dyn CompletionService,
    request: &CompletionRequest,
    retries: u32,
    backoff: Duration,
) -> Result<String, LlmError> {
    let started = Instant::now();
    let attempts = retries + 1;

    for attempt in 1..=attempts {
        match service.complete(request).await {
            Ok(reply) => return Ok(reply),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "Completion attempt failed");
                if attempt < attempts {
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }

    Err(LlmError::RetriesExhausted {
        attempts,
        elapsed: started.elapsed(),
    })
}
