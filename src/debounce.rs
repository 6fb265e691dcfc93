//! Debounce queue — batches rapid-fire inbound messages per contact.
//!
//! Every enqueue resets the quiet-period timer for its (device, phone)
//! key. When the timer fires with its scheduled time still current, the
//! whole batch is joined with newlines and handed to the sink. A timer
//! whose scheduled time was superseded does nothing; aborting the
//! superseded task is an optimization, the scheduled-time check is what
//! guarantees single delivery. The entry is removed before the sink
//! runs, so a failing sink drops the batch instead of reprocessing it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::Result;

/// Identity of one debounce batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub device_id: String,
    pub phone: String,
}

/// Downstream consumer of a fired batch.
#[async_trait]
pub trait DebounceSink: Send + Sync {
    async fn handle(&self, key: &DebounceKey, text: &str, push_name: Option<&str>)
        -> Result<()>;
}

struct Entry {
    messages: Vec<String>,
    /// Sender display name, latest non-empty one seen in the batch.
    push_name: Option<String>,
    fire_at: Instant,
    abort: Option<AbortHandle>,
}

struct Inner {
    window: Duration,
    entries: Mutex<HashMap<DebounceKey, Entry>>,
    sink: Arc<dyn DebounceSink>,
}

/// Per-contact message coalescer.
#[derive(Clone)]
pub struct DebounceQueue {
    inner: Arc<Inner>,
}

impl DebounceQueue {
    pub fn new(window: Duration, sink: Arc<dyn DebounceSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                window,
                entries: Mutex::new(HashMap::new()),
                sink,
            }),
        }
    }

    /// Append a message to the key's batch and restart its quiet period.
    pub async fn enqueue(&self, key: DebounceKey, message: String, push_name: Option<String>) {
        let fire_at = Instant::now() + self.inner.window;

        {
            let mut entries = self.inner.entries.lock().await;
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                messages: Vec::new(),
                push_name: None,
                fire_at,
                abort: None,
            });
            entry.messages.push(message);
            if push_name.is_some() {
                entry.push_name = push_name;
            }
            entry.fire_at = fire_at;
            if let Some(stale) = entry.abort.take() {
                stale.abort();
            }
            debug!(
                device_id = %key.device_id,
                phone = %key.phone,
                pending = entry.messages.len(),
                "Message enqueued"
            );
        }

        let queue = self.clone();
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            queue.fire(timer_key, fire_at).await;
        });

        let mut entries = self.inner.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            if entry.fire_at == fire_at {
                entry.abort = Some(handle.abort_handle());
            }
        }
    }

    /// Number of messages currently pending for a key.
    pub async fn pending(&self, key: &DebounceKey) -> usize {
        let entries = self.inner.entries.lock().await;
        entries.get(key).map(|e| e.messages.len()).unwrap_or(0)
    }

    async fn fire(&self, key: DebounceKey, scheduled: Instant) {
        let (messages, push_name) = {
            let mut entries = self.inner.entries.lock().await;
            match entries.get(&key) {
                // A later enqueue moved the fire time; this timer is stale.
                Some(entry) if entry.fire_at != scheduled => {
                    debug!(device_id = %key.device_id, phone = %key.phone, "Stale timer, skipping");
                    return;
                }
                Some(_) => match entries.remove(&key) {
                    Some(entry) => (entry.messages, entry.push_name),
                    None => return,
                },
                None => return,
            }
        };

        if messages.is_empty() {
            return;
        }

        let text = messages.join("\n");
        debug!(
            device_id = %key.device_id,
            phone = %key.phone,
            batch = messages.len(),
            "Debounce window elapsed, dispatching batch"
        );

        if let Err(e) = self.inner.sink.handle(&key, &text, push_name.as_deref()).await {
            error!(
                device_id = %key.device_id,
                phone = %key.phone,
                error = %e,
                "Batch processing failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::error::{Error, PipelineError};

    #[derive(Default)]
    struct RecordingSink {
        batches: StdMutex<Vec<(DebounceKey, String, Option<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl DebounceSink for RecordingSink {
        async fn handle(
            &self,
            key: &DebounceKey,
            text: &str,
            push_name: Option<&str>,
        ) -> Result<()> {
            self.batches
                .lock()
                .unwrap()
                .push((key.clone(), text.to_string(), push_name.map(String::from)));
            if self.fail {
                return Err(Error::Pipeline(PipelineError::Extraction("boom".into())));
            }
            Ok(())
        }
    }

    fn key(phone: &str) -> DebounceKey {
        DebounceKey {
            device_id: "dev".to_string(),
            phone: phone.to_string(),
        }
    }

    const WINDOW: Duration = Duration::from_secs(15);

    /// Let spawned timer tasks run to completion on the paused runtime.
    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_batch() {
        let sink = Arc::new(RecordingSink::default());
        let queue = DebounceQueue::new(WINDOW, sink.clone());

        queue.enqueue(key("601"), "one".into(), None).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        queue.enqueue(key("601"), "two".into(), Some("Ali".into())).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        queue.enqueue(key("601"), "three".into(), None).await;

        // Quiet period restarts at every enqueue; nothing fires at 15s
        // from the first message.
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert!(sink.batches.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        let batches = sink.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, "one\ntwo\nthree");
        // The push name seen mid-batch rides along with the fired batch.
        assert_eq!(batches[0].2.as_deref(), Some("Ali"));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_debounce_independently() {
        let sink = Arc::new(RecordingSink::default());
        let queue = DebounceQueue::new(WINDOW, sink.clone());

        queue.enqueue(key("601"), "a".into(), None).await;
        queue.enqueue(key("602"), "b".into(), None).await;
        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        settle().await;

        let batches = sink.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn post_fire_message_starts_fresh_batch() {
        let sink = Arc::new(RecordingSink::default());
        let queue = DebounceQueue::new(WINDOW, sink.clone());

        queue.enqueue(key("601"), "first".into(), None).await;
        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        settle().await;

        queue.enqueue(key("601"), "second".into(), None).await;
        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        settle().await;

        let batches = sink.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1, "first");
        assert_eq!(batches[1].1, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_is_a_noop_even_without_abort() {
        let sink = Arc::new(RecordingSink::default());
        let queue = DebounceQueue::new(WINDOW, sink.clone());

        queue.enqueue(key("601"), "one".into(), None).await;
        let first_fire = Instant::now() + WINDOW;

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        queue.enqueue(key("601"), "two".into(), None).await;

        // Simulate the superseded timer firing despite abort.
        queue.fire(key("601"), first_fire).await;
        assert!(sink.batches.lock().unwrap().is_empty());
        assert_eq!(queue.pending(&key("601")).await, 2);

        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        settle().await;
        let batches = sink.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, "one\ntwo");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_not_retried() {
        let sink = Arc::new(RecordingSink {
            batches: StdMutex::new(Vec::new()),
            fail: true,
        });
        let queue = DebounceQueue::new(WINDOW, sink.clone());

        queue.enqueue(key("601"), "doomed".into(), None).await;
        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        settle().await;

        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        // Entry was removed before the sink ran; nothing is pending.
        assert_eq!(queue.pending(&key("601")).await, 0);

        tokio::time::advance(WINDOW * 2).await;
        settle().await;
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }
}
