use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use recepta_core::domain::user::SessionId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer expiry listener is gone; fragment not accepted")]
    ListenerGone,
}

/// Inbound side of the aggregator, as the webhook sees it.
pub trait InboundBuffer: Send + Sync {
    fn append(&self, session: &SessionId, fragment: &str) -> Result<(), BufferError>;
}

/// Receives one flush per quiet period with the space-joined turn text.
/// The only acceptable work here is enqueueing; agent processing happens
/// on the queue workers.
#[async_trait]
pub trait FlushHandler: Send + Sync {
    async fn flush(&self, session: &SessionId, text: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
struct SenderEntry {
    fragments: Vec<String>,
    generation: u64,
}

/// Expiring per-sender fragment store. Each append re-arms the sender's
/// deadline by bumping a generation counter; the sleeper spawned for an
/// older generation finds the counter moved on and does nothing, so at
/// most one timer is ever live per sender and expiry fires exactly once
/// per quiet period.
pub struct BufferStore {
    entries: Mutex<HashMap<String, SenderEntry>>,
    idle_window: Duration,
    expiry_tx: mpsc::Sender<String>,
}

impl BufferStore {
    fn new(idle_window: Duration, expiry_tx: mpsc::Sender<String>) -> Arc<Self> {
        Arc::new(Self { entries: Mutex::new(HashMap::new()), idle_window, expiry_tx })
    }

    fn append(self: &Arc<Self>, session: &SessionId, fragment: &str) -> Result<(), BufferError> {
        if self.expiry_tx.is_closed() {
            return Err(BufferError::ListenerGone);
        }

        let generation = {
            let mut entries = self.entries.lock().expect("buffer lock poisoned");
            let entry = entries.entry(session.0.clone()).or_default();
            entry.fragments.push(fragment.to_owned());
            entry.generation += 1;
            entry.generation
        };

        let store = Arc::clone(self);
        let key = session.0.clone();
        tokio::spawn(async move {
            tokio::time::sleep(store.idle_window).await;
            store.fire_if_current(&key, generation).await;
        });

        Ok(())
    }

    async fn fire_if_current(&self, key: &str, generation: u64) {
        let still_current = {
            let entries = self.entries.lock().expect("buffer lock poisoned");
            entries.get(key).map_or(false, |entry| entry.generation == generation)
        };
        if !still_current {
            return;
        }

        if self.expiry_tx.send(key.to_owned()).await.is_err() {
            // Data-loss class event: the quiet period elapsed but nobody
            // is listening, so this turn will never flush.
            warn!(
                event_name = "buffer.expiry_notification_lost",
                session_id = key,
                "expiry listener is gone; buffered fragments are stranded"
            );
        }
    }

    /// Atomic get-and-delete. A fragment appended between expiry-fire
    /// and this call is captured here; one appended after it starts a
    /// fresh buffer with its own timer. Nothing is ever dropped.
    fn take(&self, session: &SessionId) -> Vec<String> {
        self.entries
            .lock()
            .expect("buffer lock poisoned")
            .remove(&session.0)
            .map(|entry| entry.fragments)
            .unwrap_or_default()
    }
}

/// Debounce aggregator: buffers rapid-fire fragments per sender and
/// flushes one concatenated turn after the idle window passes with no
/// new fragment. Concurrent senders are fully independent.
pub struct DebounceAggregator {
    store: Arc<BufferStore>,
}

impl DebounceAggregator {
    /// Spawns the single expiry listener; its lifetime is the returned
    /// aggregator's lifetime.
    pub fn new(idle_window: Duration, handler: Arc<dyn FlushHandler>) -> Self {
        let (expiry_tx, mut expiry_rx) = mpsc::channel::<String>(256);
        let store = BufferStore::new(idle_window, expiry_tx);

        let listener_store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(key) = expiry_rx.recv().await {
                let session = SessionId(key);
                let fragments = listener_store.take(&session);
                if fragments.is_empty() {
                    continue;
                }

                let text = fragments.join(" ");
                info!(
                    event_name = "buffer.flushed",
                    session_id = %session,
                    fragment_count = fragments.len(),
                    "idle window elapsed; flushing aggregated turn"
                );

                if let Err(error) = handler.flush(&session, &text).await {
                    warn!(
                        event_name = "buffer.flush_handler_failed",
                        session_id = %session,
                        error = %error,
                        "flush handler failed; turn was not enqueued"
                    );
                }
            }
            warn!(event_name = "buffer.listener_stopped", "buffer expiry listener stopped");
        });

        Self { store }
    }
}

impl InboundBuffer for DebounceAggregator {
    fn append(&self, session: &SessionId, fragment: &str) -> Result<(), BufferError> {
        self.store.append(session, fragment)
    }
}
