//! Duplicate-processing guard over the lock table.
//!
//! Insert-then-count: each invocation inserts its own lock row, then
//! re-counts. Seeing more than one row means another invocation is in
//! flight, so this one backs off and removes only its own row. A failed
//! count fails open; a stuck message is worse than a rare double-send.

use std::future::Future;

use tracing::{debug, warn};

use crate::error::Result;
use crate::store::model::ProcessingLock;
use crate::store::traits::Database;

/// Result of trying to claim a conversation for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// This invocation holds the claim and did (or may do) the work.
    Acquired,
    /// Another invocation is already processing; this one aborted.
    Duplicate,
}

/// Claim (conversation, flow_type) for processing.
pub async fn begin(
    db: &dyn Database,
    conversation_id: &str,
    flow_type: &str,
) -> GuardOutcome {
    let lock = ProcessingLock::new(conversation_id, flow_type);

    if let Err(e) = db.insert_lock(&lock).await {
        warn!(conversation_id, error = %e, "Lock insert failed, proceeding unguarded");
        return GuardOutcome::Acquired;
    }

    match db.count_locks(conversation_id, flow_type).await {
        Ok(count) if count > 1 => {
            debug!(conversation_id, flow_type, count, "Duplicate processing detected");
            if let Err(e) = db.delete_lock(&lock.id).await {
                warn!(conversation_id, error = %e, "Failed to remove own lock after duplicate");
            }
            GuardOutcome::Duplicate
        }
        Ok(_) => GuardOutcome::Acquired,
        Err(e) => {
            warn!(conversation_id, error = %e, "Lock count failed, proceeding unguarded");
            GuardOutcome::Acquired
        }
    }
}

/// Release every lock held for (conversation, flow_type).
pub async fn release(db: &dyn Database, conversation_id: &str, flow_type: &str) {
    if let Err(e) = db.delete_locks(conversation_id, flow_type).await {
        warn!(conversation_id, flow_type, error = %e, "Lock release failed");
    }
}

/// Run `work` under the guard. The claim is released whether the work
/// succeeds or fails; a duplicate skips the work entirely.
pub async fn run_guarded<F, Fut>(
    db: &dyn Database,
    conversation_id: &str,
    flow_type: &str,
    work: F,
) -> Result<GuardOutcome>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if begin(db, conversation_id, flow_type).await == GuardOutcome::Duplicate {
        return Ok(GuardOutcome::Duplicate);
    }

    let result = work().await;
    release(db, conversation_id, flow_type).await;
    result.map(|()| GuardOutcome::Acquired)
}
