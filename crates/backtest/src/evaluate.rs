use tracing::warn;

use common::{Candle, PumpSignal, StrategyConfig, TradeResult};

use crate::sim::OpenPosition;

/// Evaluate one signal against the population over the subsequent price path.
///
/// Every strategy whose entry trigger matches opens at the first subsequent
/// candle's open and walks forward to the first of take-profit, stop-loss or
/// its hold limit. Strategies whose trigger does not fire produce nothing —
/// that is the normal case, not a failure. A position still open when the
/// candle data runs out is skipped with a diagnostic; other pairs are
/// unaffected.
pub fn evaluate(
    signal: &PumpSignal,
    strategies: &[StrategyConfig],
    candles: &[Candle],
) -> Vec<TradeResult> {
    let Some(first) = candles.first() else {
        warn!(signal = %signal.id, symbol = %signal.symbol, "No subsequent candles — evaluation skipped");
        return Vec::new();
    };
    let entry_price = first.open;
    if entry_price <= 0.0 {
        warn!(signal = %signal.id, symbol = %signal.symbol, "Non-positive entry price — evaluation skipped");
        return Vec::new();
    }

    let mut results = Vec::new();
    for config in strategies.iter().filter(|c| c.entry_matches(signal)) {
        let mut position = OpenPosition::open(config, signal, entry_price, first.open_time, None);
        let mut exit = None;
        for candle in candles {
            if let Some((exit_price, reason)) = position.on_candle(candle) {
                exit = Some((exit_price, reason, candle.close_time));
                break;
            }
        }
        match exit {
            Some((exit_price, reason, exited_at)) => {
                results.push(position.into_result(exit_price, reason, exited_at));
            }
            None => {
                warn!(
                    strategy = config.id,
                    signal = %signal.id,
                    candles = candles.len(),
                    "Candle data ended before the hold limit — pair skipped"
                );
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::{Direction, ExitReason};
    use uuid::Uuid;

    fn signal(direction: Direction) -> PumpSignal {
        PumpSignal {
            id: Uuid::new_v4(),
            symbol: "TESTUSDT".into(),
            detected_at: Utc::now(),
            candle_close_time: Utc::now(),
            direction,
            price: 100.0,
            price_change_pct: 1.0,
            volume_ratio: 3.0,
            volume_usdt: 100_000.0,
            rsi: None,
            momentum: 0.0,
            buy_pressure: 50.0,
            confidence: 80.0,
        }
    }

    fn strategy(id: u32, direction: Direction) -> StrategyConfig {
        StrategyConfig {
            id,
            direction,
            min_confidence: 0.0,
            min_volume_ratio: 0.0,
            min_price_change_pct: 0.0,
            rsi_floor: None,
            take_profit_pct: 2.0,
            stop_loss_pct: 1.0,
            max_hold_candles: 5,
            trailing_stop: false,
            position_size_usdt: 50.0,
        }
    }

    fn flat_candles(count: usize, open: f64) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let open_time = Utc::now() + Duration::minutes(i as i64);
                Candle {
                    symbol: "TESTUSDT".into(),
                    open,
                    high: open * 1.001,
                    low: open * 0.999,
                    close: open,
                    volume: 100.0,
                    open_time,
                    close_time: open_time + Duration::minutes(1),
                }
            })
            .collect()
    }

    #[test]
    fn failed_entry_filter_produces_no_result() {
        let sig = signal(Direction::Long);
        let strategies = vec![
            strategy(1, Direction::Short), // wrong direction
            StrategyConfig {
                min_confidence: 99.0, // above the signal's 80
                ..strategy(2, Direction::Long)
            },
        ];
        let results = evaluate(&sig, &strategies, &flat_candles(10, 100.0));
        assert!(results.is_empty());
    }

    #[test]
    fn triggered_strategy_times_out_on_flat_path() {
        let sig = signal(Direction::Long);
        let strategies = vec![strategy(1, Direction::Long)];
        let results = evaluate(&sig, &strategies, &flat_candles(10, 100.0));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].exit_reason, ExitReason::Timeout);
        assert_eq!(results[0].held_candles, 5);
        assert_eq!(results[0].signal_id, sig.id);
    }

    #[test]
    fn empty_candle_window_is_skipped() {
        let sig = signal(Direction::Long);
        let strategies = vec![strategy(1, Direction::Long)];
        assert!(evaluate(&sig, &strategies, &[]).is_empty());
    }

    #[test]
    fn unresolved_position_on_short_data_is_skipped() {
        let sig = signal(Direction::Long);
        let strategies = vec![strategy(1, Direction::Long)];
        // Only 3 candles for a 5-candle hold, and no TP/SL touch.
        let results = evaluate(&sig, &strategies, &flat_candles(3, 100.0));
        assert!(results.is_empty());
    }

    #[test]
    fn one_result_per_triggered_strategy() {
        let sig = signal(Direction::Long);
        let strategies = vec![
            strategy(1, Direction::Long),
            strategy(2, Direction::Long),
            strategy(3, Direction::Short),
        ];
        let results = evaluate(&sig, &strategies, &flat_candles(10, 100.0));
        assert_eq!(results.len(), 2);
        let ids: Vec<u32> = results.iter().map(|r| r.strategy_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
