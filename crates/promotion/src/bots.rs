use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use backtest::OpenPosition;
use common::{
    ExitReason, PersistedBot, PumpSignal, Stage, StrategyConfig, StrategyStats, TradeResult,
};

/// An entry intent emitted for a REAL-stage bot that has not been filled
/// yet. The originating signal is kept so the position can be opened at the
/// reported fill price.
#[derive(Debug, Clone)]
pub struct PendingOpen {
    pub signal: PumpSignal,
}

/// A promoted strategy tracking live performance with its own statistics
/// window. Created at promotion, destroyed at retirement; the promotion
/// manager task is the only writer.
pub struct BotInstance {
    pub bot_id: Uuid,
    pub name: String,
    pub config: StrategyConfig,
    pub stage: Stage,
    /// Fresh window started at promotion — never mixed with the backtest
    /// samples that earned the promotion.
    pub stats: StrategyStats,
    /// The frozen window that earned the current stage. Used for admission
    /// ranking until the live window has its first trade.
    pub credentials: StrategyStats,
    pub promoted_at: DateTime<Utc>,
    /// Open positions, at most one per symbol.
    pub positions: HashMap<String, OpenPosition>,
    /// REAL stage: entry intents awaiting their fill.
    pub pending_open: HashMap<String, PendingOpen>,
    /// REAL stage: exit intents awaiting their fill, with the trigger reason.
    pub pending_close: HashMap<String, ExitReason>,
    /// Win/loss outcomes of the most recent trades, for the trailing
    /// demotion check.
    recent: VecDeque<bool>,
}

impl BotInstance {
    pub fn new(config: StrategyConfig, stage: Stage, name: String) -> Self {
        Self {
            bot_id: Uuid::new_v4(),
            name,
            config,
            stage,
            stats: StrategyStats::default(),
            credentials: StrategyStats::default(),
            promoted_at: Utc::now(),
            positions: HashMap::new(),
            pending_open: HashMap::new(),
            pending_close: HashMap::new(),
            recent: VecDeque::new(),
        }
    }

    /// Restore a bot after a cold start: stage and configuration only.
    /// The statistics window restarts — in-flight state is never restored.
    pub fn from_persisted(persisted: PersistedBot) -> Self {
        Self {
            bot_id: persisted.bot_id,
            name: persisted.name,
            config: persisted.config,
            stage: persisted.stage,
            stats: StrategyStats::default(),
            credentials: StrategyStats::default(),
            promoted_at: Utc::now(),
            positions: HashMap::new(),
            pending_open: HashMap::new(),
            pending_close: HashMap::new(),
            recent: VecDeque::new(),
        }
    }

    /// Fold a closed trade into this bot's window and the trailing buffer.
    pub fn record_result(&mut self, result: &TradeResult, trailing_window: usize) {
        self.stats.record(result);
        self.recent.push_back(result.pnl_usdt > 0.0);
        while self.recent.len() > trailing_window {
            self.recent.pop_front();
        }
    }

    /// Win rate over the trailing buffer, in percent. `None` until the
    /// buffer is full, so a demotion never fires on a thin sample.
    pub fn trailing_win_rate(&self, trailing_window: usize) -> Option<f64> {
        if trailing_window == 0 || self.recent.len() < trailing_window {
            return None;
        }
        let wins = self.recent.iter().filter(|&&won| won).count();
        Some(wins as f64 / self.recent.len() as f64 * 100.0)
    }

    /// Reset the statistics window at a stage boundary.
    pub fn reset_window(&mut self) {
        self.stats = StrategyStats::default();
        self.recent.clear();
        self.promoted_at = Utc::now();
    }

    pub fn has_open_work(&self) -> bool {
        !self.positions.is_empty()
            || !self.pending_open.is_empty()
            || !self.pending_close.is_empty()
    }
}

/// Admission ranking: profit factor first, then win rate. A missing profit
/// factor (no recorded losses yet) ranks lowest.
pub fn rank(stats: &StrategyStats) -> (f64, f64) {
    (stats.profit_factor().unwrap_or(0.0), stats.win_rate())
}

/// A bot's rank for admission control: its live window once it has traded,
/// otherwise the frozen credentials that earned its promotion.
pub fn effective_rank(bot: &BotInstance) -> (f64, f64) {
    if bot.stats.total_trades > 0 {
        rank(&bot.stats)
    } else {
        rank(&bot.credentials)
    }
}

/// The weakest live bot, deterministically: lowest rank, ties broken by
/// bot id so identical statistics always evict the same bot.
pub fn weakest_live_bot(bots: &HashMap<Uuid, BotInstance>) -> Option<Uuid> {
    bots.values()
        .filter(|b| b.stage.is_live())
        .min_by(|a, b| {
            let (pf_a, wr_a) = effective_rank(a);
            let (pf_b, wr_b) = effective_rank(b);
            pf_a.total_cmp(&pf_b)
                .then(wr_a.total_cmp(&wr_b))
                .then(a.bot_id.cmp(&b.bot_id))
        })
        .map(|b| b.bot_id)
}
