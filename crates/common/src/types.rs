use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A closed candle from the aggregator boundary.
/// Immutable once emitted; `close_time` is strictly non-decreasing per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Base-asset volume over the candle interval.
    pub volume: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
}

impl Candle {
    /// Quote-currency notional traded in this candle.
    pub fn notional_usdt(&self) -> f64 {
        self.volume * self.close
    }

    pub fn is_green(&self) -> bool {
        self.close > self.open
    }
}

/// Trade direction bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

/// A detected pump (or dump) event for one symbol.
/// Created by the detector, read-only downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpSignal {
    pub id: Uuid,
    pub symbol: String,
    pub detected_at: DateTime<Utc>,
    /// Close time of the candle that triggered the detection.
    pub candle_close_time: DateTime<Utc>,
    pub direction: Direction,
    /// Close price at detection — the reference price for entries.
    pub price: f64,
    /// Signed 1-period price change, in percent.
    pub price_change_pct: f64,
    /// Current candle volume relative to the rolling average.
    pub volume_ratio: f64,
    /// Quote-currency notional of the triggering candle.
    pub volume_usdt: f64,
    /// None until the detector has enough history for the RSI period.
    pub rsi: Option<f64>,
    /// Ratio of the latest 2-candle move to the preceding one.
    pub momentum: f64,
    /// Percentage of green candles over the recent window.
    pub buy_pressure: f64,
    /// 0–100, monotonic in the magnitude metrics above.
    pub confidence: f64,
}

/// A single parametrized trading rule. Generated once at startup and never
/// mutated afterwards; statistics reference it by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: u32,
    pub direction: Direction,
    pub min_confidence: f64,
    pub min_volume_ratio: f64,
    /// Minimum price-change magnitude (percent) the signal must show.
    pub min_price_change_pct: f64,
    /// Optional RSI lower bound; signals without an RSI value pass.
    pub rsi_floor: Option<f64>,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Position is force-closed after this many candles.
    pub max_hold_candles: u32,
    /// Ratchet the stop with the favourable extreme.
    pub trailing_stop: bool,
    pub position_size_usdt: f64,
}

impl StrategyConfig {
    /// Entry trigger: does this strategy trade on the given signal?
    pub fn entry_matches(&self, signal: &PumpSignal) -> bool {
        if signal.direction != self.direction {
            return false;
        }
        if signal.price_change_pct.abs() < self.min_price_change_pct {
            return false;
        }
        if signal.volume_ratio < self.min_volume_ratio {
            return false;
        }
        if signal.confidence < self.min_confidence {
            return false;
        }
        if let (Some(floor), Some(rsi)) = (self.rsi_floor, signal.rsi) {
            if rsi < floor {
                return false;
            }
        }
        true
    }

    /// Compact label used in logs and reports.
    pub fn label(&self) -> String {
        format!(
            "S{:03}_{}_TP{}%_SL{}%_Vol{}x",
            self.id, self.direction, self.take_profit_pct, self.stop_loss_pct, self.min_volume_ratio
        )
    }
}

/// Why a simulated or live position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Timeout,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TP"),
            ExitReason::StopLoss => write!(f, "SL"),
            ExitReason::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Outcome of one (strategy, signal) evaluation. Append-only fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub strategy_id: u32,
    pub signal_id: Uuid,
    /// Set when the trade belongs to a promoted bot rather than the
    /// backtest population.
    pub bot_id: Option<Uuid>,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub pnl_usdt: f64,
    pub pnl_pct: f64,
    pub held_candles: u32,
    pub entered_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
}

/// Rolling performance aggregate for one strategy or bot.
/// Exactly one writer-of-record per key; snapshots are read concurrently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub total_pnl: f64,
    pub sum_pnl_sq: f64,
    /// Running peak of cumulative pnl, for drawdown tracking.
    pub peak_pnl: f64,
    /// Worst peak-to-trough of cumulative pnl, in USDT.
    pub max_drawdown: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StrategyStats {
    /// Fold one trade result into the aggregate.
    pub fn record(&mut self, result: &TradeResult) {
        self.total_trades += 1;
        if result.pnl_usdt > 0.0 {
            self.wins += 1;
            self.gross_profit += result.pnl_usdt;
        } else {
            self.losses += 1;
            self.gross_loss += -result.pnl_usdt;
        }
        self.total_pnl += result.pnl_usdt;
        self.sum_pnl_sq += result.pnl_usdt * result.pnl_usdt;
        if self.total_pnl > self.peak_pnl {
            self.peak_pnl = self.total_pnl;
        }
        let drawdown = self.peak_pnl - self.total_pnl;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
        self.last_updated = Some(result.exited_at);
    }

    /// Win rate in percent; 0 with no trades.
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.total_trades as f64 * 100.0
    }

    /// Gross profit over gross loss. `None` while gross loss is zero —
    /// insufficient data, not an infinite edge.
    pub fn profit_factor(&self) -> Option<f64> {
        if self.gross_loss > 0.0 {
            Some(self.gross_profit / self.gross_loss)
        } else {
            None
        }
    }

    /// Simplified per-trade Sharpe: mean pnl over pnl standard deviation.
    pub fn sharpe(&self) -> Option<f64> {
        if self.total_trades < 2 {
            return None;
        }
        let n = self.total_trades as f64;
        let mean = self.total_pnl / n;
        let variance = (self.sum_pnl_sq / n - mean * mean).max(0.0);
        let std_dev = variance.sqrt();
        if std_dev > 0.0 {
            Some(mean / std_dev)
        } else {
            None
        }
    }
}

/// Evaluation pipeline stage of a strategy or bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Backtest,
    Simulated,
    Real,
    Retired,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Backtest => write!(f, "BACKTEST"),
            Stage::Simulated => write!(f, "SIMULATED"),
            Stage::Real => write!(f, "REAL"),
            Stage::Retired => write!(f, "RETIRED"),
        }
    }
}

impl Stage {
    /// The only legal edges: forward promotion plus demotion to RETIRED.
    /// RETIRED is terminal.
    pub fn can_transition(self, to: Stage) -> bool {
        matches!(
            (self, to),
            (Stage::Backtest, Stage::Simulated)
                | (Stage::Simulated, Stage::Real)
                | (Stage::Simulated, Stage::Retired)
                | (Stage::Real, Stage::Retired)
        )
    }

    /// Counted against the `max_bots` capacity bound.
    pub fn is_live(self) -> bool {
        matches!(self, Stage::Simulated | Stage::Real)
    }
}

/// Order request emitted for REAL-stage bots only. The execution
/// collaborator fills it and reports back asynchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub bot_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub size_usdt: f64,
    pub timestamp: DateTime<Utc>,
}

/// Asynchronous fill confirmation from the execution collaborator.
/// A fill in the bot's direction opens; the opposite direction closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFill {
    pub bot_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// A stage change of a strategy or bot, with the evidence that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub strategy_id: u32,
    pub bot_id: Option<Uuid>,
    pub name: String,
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
    pub reason: String,
    /// Statistics window frozen at the moment of transition, for audit.
    pub frozen_stats: Option<StrategyStats>,
    /// Present on promotions so the sink can restore the bot on cold start.
    pub config: Option<StrategyConfig>,
}

/// Append-only record stream handed to the repository sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SinkRecord {
    Signal(PumpSignal),
    Trade(TradeResult),
    Transition(StageTransition),
    BotStats {
        bot_id: Uuid,
        name: String,
        stage: Stage,
        stats: StrategyStats,
        at: DateTime<Utc>,
    },
}

/// Bot state restored from the repository at cold start: stage and
/// configuration only, never in-flight window state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedBot {
    pub bot_id: Uuid,
    pub name: String,
    pub stage: Stage,
    pub config: StrategyConfig,
}
