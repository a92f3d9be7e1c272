use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{PersistedBot, Result, SinkRecord};

/// Abstraction over the persistence collaborator.
///
/// The core only ever appends records and, at cold start, reads back the
/// promoted bots (stage and configuration — never in-flight window state).
/// `SqliteSink` in `crates/sink` implements this for real storage;
/// `MemorySink` implements it for tests.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append one record. Implementations must tolerate replays — appending
    /// the same record twice must not duplicate it.
    async fn append(&self, record: &SinkRecord) -> Result<()>;

    /// Bots to restore at startup (SIMULATED and REAL stages only).
    async fn load_bots(&self) -> Result<Vec<PersistedBot>>;
}

/// Non-blocking producer side of the bounded sink queue.
///
/// Every component that emits records holds a clone of this handle. A full
/// queue drops the new record (with a warning and a counter) rather than
/// blocking candle processing — a slow persistence layer must never stall
/// the pipeline or grow memory without bound.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<SinkRecord>,
    dropped: Arc<AtomicU64>,
}

impl SinkHandle {
    /// Create the handle and the receiver end for the sink worker.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn append(&self, record: SinkRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "Sink queue full — record dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Sink queue closed — record dropped");
            }
        }
    }

    /// Total records dropped due to a full queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
