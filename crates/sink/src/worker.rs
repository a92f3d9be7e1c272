use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{RecordSink, SinkRecord};

/// Drains the bounded sink queue into the persistence collaborator.
///
/// Each record gets a bounded number of attempts with a short backoff.
/// Sustained failure flips the shared degraded flag — the pipeline keeps
/// running locally and the flag is the explicit signal that records are
/// being lost; the first successful write afterwards clears it.
pub struct SinkWorker {
    rx: mpsc::Receiver<SinkRecord>,
    sink: Arc<dyn RecordSink>,
    degraded: Arc<AtomicBool>,
    max_attempts: u32,
    backoff: Duration,
}

impl SinkWorker {
    pub fn new(rx: mpsc::Receiver<SinkRecord>, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            rx,
            sink,
            degraded: Arc::new(AtomicBool::new(false)),
            max_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }

    /// Shared flag for dashboards and the binary's shutdown report.
    pub fn degraded_flag(&self) -> Arc<AtomicBool> {
        self.degraded.clone()
    }

    /// Run the worker loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("SinkWorker running");
        while let Some(record) = self.rx.recv().await {
            self.write_with_retry(&record).await;
        }
        info!("Sink queue closed — worker stopped");
    }

    async fn write_with_retry(&self, record: &SinkRecord) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sink.append(record).await {
                Ok(()) => {
                    if self.degraded.swap(false, Ordering::Relaxed) {
                        info!("Repository sink recovered — degraded mode cleared");
                    }
                    return;
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(error = %e, attempt, "Sink append failed — retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    if !self.degraded.swap(true, Ordering::Relaxed) {
                        warn!(
                            error = %e,
                            "Repository sink unavailable — entering degraded (local-only) mode"
                        );
                    } else {
                        debug!(error = %e, "Record lost while degraded");
                    }
                    return;
                }
            }
        }
    }
}
