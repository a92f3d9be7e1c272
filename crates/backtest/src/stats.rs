use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use common::{StrategyConfig, StrategyStats, TradeResult};

struct Slot {
    stats: StrategyStats,
    /// Signal ids already counted for this strategy — replays are rejected.
    applied: HashSet<Uuid>,
}

/// Rolling statistics for the whole backtest population.
///
/// The key set is fixed at startup from the generated population, so the map
/// itself is never locked — each strategy has its own lock and updates to
/// different strategies never contend. Snapshots take a momentary per-key
/// read, never a store-wide lock, so the promotion scan cannot stall trade
/// evaluation.
pub struct StatsStore {
    slots: HashMap<u32, RwLock<Slot>>,
}

impl StatsStore {
    pub fn new(population: &[StrategyConfig]) -> Self {
        let slots = population
            .iter()
            .map(|config| {
                (
                    config.id,
                    RwLock::new(Slot {
                        stats: StrategyStats::default(),
                        applied: HashSet::new(),
                    }),
                )
            })
            .collect();
        Self { slots }
    }

    /// Count one trade result. Returns false when the (strategy, signal)
    /// pair was already counted or the strategy id is unknown — the result
    /// must then not be forwarded downstream.
    pub async fn apply(&self, result: &TradeResult) -> bool {
        let Some(slot) = self.slots.get(&result.strategy_id) else {
            warn!(strategy = result.strategy_id, "Trade result for unknown strategy dropped");
            return false;
        };
        let mut slot = slot.write().await;
        if !slot.applied.insert(result.signal_id) {
            return false;
        }
        slot.stats.record(result);
        true
    }

    pub async fn snapshot(&self, strategy_id: u32) -> Option<StrategyStats> {
        match self.slots.get(&strategy_id) {
            Some(slot) => Some(slot.read().await.stats.clone()),
            None => None,
        }
    }

    /// Momentary consistent read of every strategy's stats, in id order.
    pub async fn snapshot_all(&self) -> Vec<(u32, StrategyStats)> {
        let mut ids: Vec<u32> = self.slots.keys().copied().collect();
        ids.sort_unstable();

        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(stats) = self.snapshot(id).await {
                snapshots.push((id, stats));
            }
        }
        snapshots
    }
}
