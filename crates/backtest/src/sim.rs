use chrono::{DateTime, Utc};
use uuid::Uuid;

use common::{Candle, Direction, ExitReason, PumpSignal, StrategyConfig, TradeResult};

/// A simulated position opened for one (strategy, signal) pair.
///
/// The same walk drives the backtest engine and the paper fills of
/// SIMULATED-stage bots, so both stages share identical exit semantics.
#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub strategy_id: u32,
    pub bot_id: Option<Uuid>,
    pub signal_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub size_usdt: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    stop_loss_pct: f64,
    trailing: bool,
    pub max_hold_candles: u32,
    pub held_candles: u32,
    pub entered_at: DateTime<Utc>,
    /// Favourable extreme seen so far, for the trailing ratchet.
    best_price: f64,
}

impl OpenPosition {
    pub fn open(
        config: &StrategyConfig,
        signal: &PumpSignal,
        entry_price: f64,
        entered_at: DateTime<Utc>,
        bot_id: Option<Uuid>,
    ) -> Self {
        let (take_profit, stop_loss) = match config.direction {
            Direction::Long => (
                entry_price * (1.0 + config.take_profit_pct / 100.0),
                entry_price * (1.0 - config.stop_loss_pct / 100.0),
            ),
            Direction::Short => (
                entry_price * (1.0 - config.take_profit_pct / 100.0),
                entry_price * (1.0 + config.stop_loss_pct / 100.0),
            ),
        };

        Self {
            strategy_id: config.id,
            bot_id,
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            direction: config.direction,
            entry_price,
            size_usdt: config.position_size_usdt,
            take_profit,
            stop_loss,
            stop_loss_pct: config.stop_loss_pct,
            trailing: config.trailing_stop,
            max_hold_candles: config.max_hold_candles,
            held_candles: 0,
            entered_at,
            best_price: entry_price,
        }
    }

    /// Advance one candle. Returns the exit price and reason once closed.
    ///
    /// When take-profit and stop-loss are both crossed within the same
    /// candle, the stop-loss wins — the conservative assumption. The hold
    /// limit closes at the candle's close.
    pub fn on_candle(&mut self, candle: &Candle) -> Option<(f64, ExitReason)> {
        self.held_candles += 1;

        match self.direction {
            Direction::Long => {
                if self.trailing && candle.high > self.best_price {
                    self.best_price = candle.high;
                    let ratcheted = candle.high * (1.0 - self.stop_loss_pct / 100.0);
                    if ratcheted > self.stop_loss {
                        self.stop_loss = ratcheted;
                    }
                }
                if candle.low <= self.stop_loss {
                    return Some((self.stop_loss, ExitReason::StopLoss));
                }
                if candle.high >= self.take_profit {
                    return Some((self.take_profit, ExitReason::TakeProfit));
                }
            }
            Direction::Short => {
                if self.trailing && candle.low < self.best_price {
                    self.best_price = candle.low;
                    let ratcheted = candle.low * (1.0 + self.stop_loss_pct / 100.0);
                    if ratcheted < self.stop_loss {
                        self.stop_loss = ratcheted;
                    }
                }
                if candle.high >= self.stop_loss {
                    return Some((self.stop_loss, ExitReason::StopLoss));
                }
                if candle.low <= self.take_profit {
                    return Some((self.take_profit, ExitReason::TakeProfit));
                }
            }
        }

        if self.held_candles >= self.max_hold_candles {
            return Some((candle.close, ExitReason::Timeout));
        }
        None
    }

    /// Build the append-only trade fact for a closed position.
    pub fn into_result(
        self,
        exit_price: f64,
        exit_reason: ExitReason,
        exited_at: DateTime<Utc>,
    ) -> TradeResult {
        let pnl_pct = match self.direction {
            Direction::Long => (exit_price - self.entry_price) / self.entry_price * 100.0,
            Direction::Short => (self.entry_price - exit_price) / self.entry_price * 100.0,
        };
        let pnl_usdt = pnl_pct / 100.0 * self.size_usdt;

        TradeResult {
            strategy_id: self.strategy_id,
            signal_id: self.signal_id,
            bot_id: self.bot_id,
            symbol: self.symbol,
            direction: self.direction,
            entry_price: self.entry_price,
            exit_price,
            exit_reason,
            pnl_usdt,
            pnl_pct,
            held_candles: self.held_candles,
            entered_at: self.entered_at,
            exited_at,
        }
    }
}
