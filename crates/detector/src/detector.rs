use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{Candle, Direction, Error, PumpSignal, Result, SinkHandle, SinkRecord};

use crate::rsi::rsi;

/// Detection thresholds. Loaded from the pipeline TOML file; every field
/// has a default so a partial `[detector]` table is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Number of closed candles kept per symbol. No signal is emitted
    /// until the window is full.
    pub window: usize,
    /// Minimum 1-period price change magnitude, in percent.
    pub price_increase_1m: f64,
    /// Minimum current-candle volume relative to the rolling average.
    pub volume_spike_multiplier: f64,
    /// Minimum quote-currency notional of the triggering candle.
    pub min_volume_usdt: f64,
    /// Minimum confidence score (0–100) to emit a signal.
    pub min_confidence: f64,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub momentum_threshold: f64,
    /// Per-symbol quiet period after an emitted signal, on the candle clock.
    pub cooldown_secs: u64,
    /// Suppress when the lookback window already contains a move this large...
    pub recent_pump_price_pct: f64,
    /// ...with a volume spike this high. Only the first pump candle signals.
    pub recent_pump_volume_ratio: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window: 20,
            price_increase_1m: 3.0,
            volume_spike_multiplier: 3.0,
            min_volume_usdt: 50_000.0,
            min_confidence: 70.0,
            rsi_period: 14,
            rsi_overbought: 70.0,
            momentum_threshold: 2.0,
            cooldown_secs: 600,
            recent_pump_price_pct: 5.0,
            recent_pump_volume_ratio: 3.0,
        }
    }
}

impl DetectorConfig {
    /// Reject invalid thresholds outright — never silently clamp.
    pub fn validate(&self) -> Result<()> {
        if self.window < 5 {
            return Err(Error::Config(format!(
                "detector window must be >= 5, got {}",
                self.window
            )));
        }
        if self.price_increase_1m <= 0.0 {
            return Err(Error::Config("price_increase_1m must be positive".into()));
        }
        if self.volume_spike_multiplier <= 0.0 {
            return Err(Error::Config("volume_spike_multiplier must be positive".into()));
        }
        if self.min_volume_usdt < 0.0 {
            return Err(Error::Config("min_volume_usdt must not be negative".into()));
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence must be within 0–100, got {}",
                self.min_confidence
            )));
        }
        if self.rsi_period < 2 {
            return Err(Error::Config("rsi_period must be >= 2".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SymbolState {
    candles: VecDeque<Candle>,
    /// Candle timestamp of the last emitted signal — a duplicate candle
    /// update for the same timestamp must not signal twice.
    last_signal_candle: Option<DateTime<Utc>>,
    last_signal_at: Option<DateTime<Utc>>,
}

/// Detects short-lived price/volume spikes on a per-symbol candle stream.
///
/// State is partitioned by symbol with no cross-symbol sharing, and is
/// rebuilt from the live stream after a restart — nothing is persisted.
/// No signal is the default outcome; false negatives are acceptable,
/// exceptions are not.
pub struct PumpDetector {
    config: DetectorConfig,
    symbols: HashMap<String, SymbolState>,
    anomalies: u64,
}

impl PumpDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            symbols: HashMap::new(),
            anomalies: 0,
        })
    }

    /// Out-of-order candles discarded so far.
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Feed one candle; returns a signal when all gates pass.
    pub fn on_candle(&mut self, candle: &Candle) -> Option<PumpSignal> {
        let state = self.symbols.entry(candle.symbol.clone()).or_default();

        match state.candles.back().map(|last| last.close_time) {
            Some(last_close) if candle.close_time < last_close => {
                self.anomalies += 1;
                warn!(
                    symbol = %candle.symbol,
                    close_time = %candle.close_time,
                    "Out-of-order candle discarded"
                );
                return None;
            }
            Some(last_close) if candle.close_time == last_close => {
                // Last write wins on a duplicate timestamp.
                if let Some(slot) = state.candles.back_mut() {
                    *slot = candle.clone();
                }
            }
            _ => {
                state.candles.push_back(candle.clone());
                if state.candles.len() > self.config.window {
                    state.candles.pop_front();
                }
            }
        }

        Self::analyze(&self.config, state)
    }

    fn analyze(config: &DetectorConfig, state: &mut SymbolState) -> Option<PumpSignal> {
        if state.candles.len() < config.window {
            return None;
        }

        let n = state.candles.len();
        let current = state.candles.back()?.clone();
        let prev = state.candles.get(n - 2)?;

        if state.last_signal_candle == Some(current.close_time) {
            return None;
        }
        if let Some(at) = state.last_signal_at {
            if current.close_time - at < Duration::seconds(config.cooldown_secs as i64) {
                return None;
            }
        }

        if prev.close <= 0.0 {
            return None;
        }
        let price_change_pct = (current.close - prev.close) / prev.close * 100.0;

        let direction = if price_change_pct >= config.price_increase_1m {
            Direction::Long
        } else if price_change_pct <= -config.price_increase_1m {
            Direction::Short
        } else {
            return None;
        };

        // Rolling average excludes the triggering candle.
        let avg_volume =
            state.candles.iter().take(n - 1).map(|c| c.volume).sum::<f64>() / (n - 1) as f64;
        if avg_volume <= 0.0 {
            return None;
        }
        let volume_ratio = current.volume / avg_volume;
        if volume_ratio < config.volume_spike_multiplier {
            return None;
        }

        let volume_usdt = current.notional_usdt();
        if volume_usdt < config.min_volume_usdt {
            return None;
        }

        if Self::recently_pumped(config, state) {
            debug!(symbol = %current.symbol, "Symbol already pumped in lookback — suppressed");
            return None;
        }

        let closes: Vec<f64> = state.candles.iter().map(|c| c.close).collect();
        let rsi_value = rsi(&closes, config.rsi_period);
        let momentum = momentum(&closes);
        let green_pct = green_candle_pct(&state.candles);

        let confidence = confidence_score(
            config,
            direction,
            price_change_pct,
            volume_ratio,
            rsi_value,
            momentum,
            green_pct,
        );
        if confidence < config.min_confidence {
            return None;
        }

        state.last_signal_candle = Some(current.close_time);
        state.last_signal_at = Some(current.close_time);

        Some(PumpSignal {
            id: Uuid::new_v4(),
            symbol: current.symbol.clone(),
            detected_at: Utc::now(),
            candle_close_time: current.close_time,
            direction,
            price: current.close,
            price_change_pct,
            volume_ratio,
            volume_usdt,
            rsi: rsi_value,
            momentum,
            buy_pressure: green_pct,
            confidence,
        })
    }

    /// True when the lookback window (excluding the current candle) already
    /// contains a strong move on spiked volume.
    fn recently_pumped(config: &DetectorConfig, state: &SymbolState) -> bool {
        let n = state.candles.len();
        for i in 1..n - 1 {
            let prev = &state.candles[i - 1];
            let candle = &state.candles[i];
            if prev.close <= 0.0 {
                continue;
            }
            let change = (candle.close - prev.close) / prev.close * 100.0;
            if change.abs() < config.recent_pump_price_pct {
                continue;
            }

            let start = i.saturating_sub(10);
            let avg = state
                .candles
                .iter()
                .skip(start)
                .take(i - start)
                .map(|c| c.volume)
                .sum::<f64>()
                / (i - start) as f64;
            let ratio = if avg > 0.0 { candle.volume / avg } else { 1.0 };
            if ratio >= config.recent_pump_volume_ratio {
                return true;
            }
        }
        false
    }

    /// Run the detection loop: consume candles, publish signals, append
    /// each signal to the sink. Call from `tokio::spawn`.
    pub async fn run(
        mut self,
        mut candle_rx: broadcast::Receiver<Candle>,
        signal_tx: broadcast::Sender<PumpSignal>,
        sink: SinkHandle,
    ) {
        info!(window = self.config.window, "PumpDetector running");
        loop {
            match candle_rx.recv().await {
                Ok(candle) => {
                    if let Some(signal) = self.on_candle(&candle) {
                        info!(
                            symbol = %signal.symbol,
                            direction = %signal.direction,
                            confidence = signal.confidence,
                            price_change_pct = signal.price_change_pct,
                            volume_ratio = signal.volume_ratio,
                            "Pump signal emitted"
                        );
                        sink.append(SinkRecord::Signal(signal.clone()));
                        if signal_tx.send(signal).is_err() {
                            warn!("Signal channel closed — stopping detector");
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "Detector lagged — dropped candles");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Candle stream closed — detector stopping");
                    return;
                }
            }
        }
    }
}

/// Ratio of the latest 2-candle move to the preceding one. Zero when the
/// preceding move is flat or history is short.
fn momentum(closes: &[f64]) -> f64 {
    if closes.len() < 5 {
        return 0.0;
    }
    let n = closes.len();
    let recent = closes[n - 1] - closes[n - 3];
    let previous = closes[n - 3] - closes[n - 5];
    if previous == 0.0 {
        return 0.0;
    }
    recent / previous.abs()
}

/// Percentage of green candles over the last 10.
fn green_candle_pct(candles: &VecDeque<Candle>) -> f64 {
    if candles.len() < 10 {
        return 0.0;
    }
    let recent = candles.iter().rev().take(10);
    let green = recent.filter(|c| c.is_green()).count();
    green as f64 / 10.0 * 100.0
}

/// Confidence score 0–100, monotonic in every magnitude input. The price
/// and volume components are calibrated so that hitting the configured
/// threshold exactly scores 15 and 25 points respectively; RSI, momentum
/// and candle-pressure add direction-adjusted bonuses.
fn confidence_score(
    config: &DetectorConfig,
    direction: Direction,
    price_change_pct: f64,
    volume_ratio: f64,
    rsi_value: Option<f64>,
    momentum: f64,
    green_pct: f64,
) -> f64 {
    let mut score = 0.0;

    score += (price_change_pct.abs() / config.price_increase_1m * 15.0).min(30.0);
    score += (volume_ratio / config.volume_spike_multiplier * 25.0).min(25.0);

    if let Some(rsi) = rsi_value {
        let stretched = match direction {
            Direction::Long => rsi,
            Direction::Short => 100.0 - rsi,
        };
        if stretched >= config.rsi_overbought {
            score += 15.0;
        } else if stretched >= 60.0 {
            score += 10.0;
        }
    }

    let drive = match direction {
        Direction::Long => momentum,
        Direction::Short => -momentum,
    };
    if drive >= config.momentum_threshold {
        score += 15.0;
    } else if drive >= 1.0 {
        score += 10.0;
    }

    let pressure = match direction {
        Direction::Long => green_pct,
        Direction::Short => 100.0 - green_pct,
    };
    if pressure >= 80.0 {
        score += 15.0;
    } else if pressure >= 60.0 {
        score += 10.0;
    }

    score.min(100.0).round()
}
