use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use common::{Error, PersistedBot, RecordSink, Result, SinkRecord, Stage};

/// In-memory sink for tests and local runs without a database.
///
/// Mirrors the SQLite sink's semantics: records accumulate append-only and
/// promotion transitions maintain the bot table used by `load_bots`.
#[derive(Default)]
pub struct MemorySink {
    records: RwLock<Vec<SinkRecord>>,
    bots: RwLock<HashMap<Uuid, PersistedBot>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every append fail, to exercise retry and degraded mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub async fn records(&self) -> Vec<SinkRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&self, record: &SinkRecord) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::Sink("memory sink configured to fail".into()));
        }

        if let SinkRecord::Transition(transition) = record {
            if let Some(bot_id) = transition.bot_id {
                let mut bots = self.bots.write().await;
                match (&transition.config, transition.to) {
                    (Some(config), to) if to.is_live() => {
                        bots.insert(
                            bot_id,
                            PersistedBot {
                                bot_id,
                                name: transition.name.clone(),
                                stage: to,
                                config: config.clone(),
                            },
                        );
                    }
                    (_, to) => {
                        if let Some(bot) = bots.get_mut(&bot_id) {
                            bot.stage = to;
                        }
                    }
                }
            }
        }

        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn load_bots(&self) -> Result<Vec<PersistedBot>> {
        Ok(self
            .bots
            .read()
            .await
            .values()
            .filter(|b| matches!(b.stage, Stage::Simulated | Stage::Real))
            .cloned()
            .collect())
    }
}
