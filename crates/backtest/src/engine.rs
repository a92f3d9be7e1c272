use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{Candle, PumpSignal, SinkHandle, SinkRecord, StrategyConfig};

use crate::evaluate::evaluate;
use crate::stats::StatsStore;

struct PendingEvaluation {
    signal: PumpSignal,
    candles: Vec<Candle>,
}

/// Streaming evaluation task: buffers the subsequent price path for every
/// admitted signal and, once the horizon is full, fans the signal out over
/// the whole population in one pass.
///
/// Signal ids are deduplicated on admission and again per (strategy, signal)
/// inside the stats store, so a redelivered signal is counted exactly once.
/// On shutdown no new signals are admitted; already-admitted evaluations run
/// to completion.
pub struct BacktestEngine {
    population: Arc<Vec<StrategyConfig>>,
    stats: Arc<StatsStore>,
    sink: SinkHandle,
    signal_rx: broadcast::Receiver<PumpSignal>,
    candle_rx: broadcast::Receiver<Candle>,
    shutdown_rx: watch::Receiver<bool>,
    /// Candles to collect per signal — the population's longest hold.
    horizon: usize,
    pending: HashMap<Uuid, PendingEvaluation>,
    seen: HashSet<Uuid>,
    draining: bool,
    signal_closed: bool,
}

impl BacktestEngine {
    pub fn new(
        population: Arc<Vec<StrategyConfig>>,
        stats: Arc<StatsStore>,
        sink: SinkHandle,
        signal_rx: broadcast::Receiver<PumpSignal>,
        candle_rx: broadcast::Receiver<Candle>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let horizon = population
            .iter()
            .map(|c| c.max_hold_candles as usize)
            .max()
            .unwrap_or(0)
            .max(1);

        Self {
            population,
            stats,
            sink,
            signal_rx,
            candle_rx,
            shutdown_rx,
            horizon,
            pending: HashMap::new(),
            seen: HashSet::new(),
            draining: false,
            signal_closed: false,
        }
    }

    /// Run the engine loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            strategies = self.population.len(),
            horizon = self.horizon,
            "BacktestEngine running"
        );
        loop {
            tokio::select! {
                res = self.signal_rx.recv(), if !self.signal_closed => match res {
                    Ok(signal) => self.admit(signal),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "Engine signal channel lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.signal_closed = true;
                        self.draining = true;
                    }
                },
                res = self.candle_rx.recv() => match res {
                    Ok(candle) => self.on_candle(candle).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "Engine candle channel lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.flush_remaining().await;
                        info!("Candle stream closed — engine stopped");
                        return;
                    }
                },
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(pending = self.pending.len(), "Shutdown — no new signals accepted");
                        self.draining = true;
                    }
                }
            }

            if self.draining && self.pending.is_empty() {
                info!("In-flight evaluations complete — engine stopped");
                return;
            }
        }
    }

    fn admit(&mut self, signal: PumpSignal) {
        if self.draining {
            debug!(signal = %signal.id, "Draining — signal not admitted");
            return;
        }
        if !self.seen.insert(signal.id) {
            debug!(signal = %signal.id, "Duplicate signal delivery ignored");
            return;
        }
        debug!(signal = %signal.id, symbol = %signal.symbol, "Signal admitted for evaluation");
        self.pending.insert(
            signal.id,
            PendingEvaluation {
                signal,
                candles: Vec::new(),
            },
        );
    }

    async fn on_candle(&mut self, candle: Candle) {
        let mut ready = Vec::new();
        for (id, pending) in self.pending.iter_mut() {
            if pending.signal.symbol == candle.symbol
                && candle.close_time > pending.signal.candle_close_time
            {
                pending.candles.push(candle.clone());
                if pending.candles.len() >= self.horizon {
                    ready.push(*id);
                }
            }
        }
        for id in ready {
            if let Some(pending) = self.pending.remove(&id) {
                self.complete(pending).await;
            }
        }
    }

    /// The candle stream ended — evaluate what was collected. Positions the
    /// data cannot resolve are skipped inside `evaluate`.
    async fn flush_remaining(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        info!(
            pending = self.pending.len(),
            "Evaluating remaining signals with collected data"
        );
        let remaining: Vec<PendingEvaluation> =
            self.pending.drain().map(|(_, pending)| pending).collect();
        for pending in remaining {
            self.complete(pending).await;
        }
    }

    async fn complete(&self, pending: PendingEvaluation) {
        let results = evaluate(&pending.signal, &self.population, &pending.candles);
        let mut counted = 0;
        for result in results {
            // Stats update and sink append act as one unit: a duplicate is
            // neither counted nor forwarded.
            if self.stats.apply(&result).await {
                counted += 1;
                self.sink.append(SinkRecord::Trade(result));
            }
        }
        if counted > 0 {
            info!(
                signal = %pending.signal.id,
                symbol = %pending.signal.symbol,
                trades = counted,
                "Signal evaluated"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::Direction;

    fn trigger_all_strategy(id: u32) -> StrategyConfig {
        StrategyConfig {
            id,
            direction: Direction::Long,
            min_confidence: 0.0,
            min_volume_ratio: 0.0,
            min_price_change_pct: 0.0,
            rsi_floor: None,
            take_profit_pct: 50.0,
            stop_loss_pct: 50.0,
            max_hold_candles: 3,
            trailing_stop: false,
            position_size_usdt: 50.0,
        }
    }

    fn signal_at(minute: i64) -> PumpSignal {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        PumpSignal {
            id: Uuid::new_v4(),
            symbol: "TESTUSDT".into(),
            detected_at: t,
            candle_close_time: t,
            direction: Direction::Long,
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

    fn candle_at(minute: i64) -> Candle {
        let open_time =
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Candle {
            symbol: "TESTUSDT".into(),
            open: 100.0,
            high: 100.5,
            low: 99.5,
            close: 100.0,
            volume: 100.0,
            open_time,
            close_time: open_time + Duration::minutes(1),
        }
    }

    struct Harness {
        signal_tx: broadcast::Sender<PumpSignal>,
        candle_tx: broadcast::Sender<Candle>,
        shutdown_tx: watch::Sender<bool>,
        stats: Arc<StatsStore>,
        sink_rx: tokio::sync::mpsc::Receiver<SinkRecord>,
    }

    fn spawn_engine() -> Harness {
        let population = Arc::new(vec![trigger_all_strategy(1)]);
        let stats = Arc::new(StatsStore::new(&population));
        let (sink, sink_rx) = SinkHandle::new(64);
        let (signal_tx, signal_rx) = broadcast::channel(64);
        let (candle_tx, candle_rx) = broadcast::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = BacktestEngine::new(
            population,
            stats.clone(),
            sink,
            signal_rx,
            candle_rx,
            shutdown_rx,
        );
        tokio::spawn(engine.run());

        Harness {
            signal_tx,
            candle_tx,
            shutdown_tx,
            stats,
            sink_rx,
        }
    }

    #[tokio::test]
    async fn signal_is_evaluated_once_the_horizon_fills() {
        let mut h = spawn_engine();

        h.signal_tx.send(signal_at(0)).unwrap();
        for minute in 1..=3 {
            h.candle_tx.send(candle_at(minute)).unwrap();
        }

        let record =
            tokio::time::timeout(std::time::Duration::from_secs(1), h.sink_rx.recv())
                .await
                .expect("timeout")
                .expect("sink closed");
        assert!(matches!(record, SinkRecord::Trade(_)));

        let stats = h.stats.snapshot(1).await.unwrap();
        assert_eq!(stats.total_trades, 1);
    }

    #[tokio::test]
    async fn redelivered_signal_counts_exactly_once() {
        let mut h = spawn_engine();

        let signal = signal_at(0);
        h.signal_tx.send(signal.clone()).unwrap();
        h.signal_tx.send(signal).unwrap();
        for minute in 1..=6 {
            h.candle_tx.send(candle_at(minute)).unwrap();
        }

        // First trade result arrives…
        let record =
            tokio::time::timeout(std::time::Duration::from_secs(1), h.sink_rx.recv())
                .await
                .expect("timeout")
                .expect("sink closed");
        assert!(matches!(record, SinkRecord::Trade(_)));

        // …and no second one follows.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(h.sink_rx.try_recv().is_err());

        let stats = h.stats.snapshot(1).await.unwrap();
        assert_eq!(stats.total_trades, 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_signals_but_completes_admitted_ones() {
        let h = spawn_engine();

        h.signal_tx.send(signal_at(0)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        h.shutdown_tx.send(true).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Arrives after shutdown — must not be admitted.
        h.signal_tx.send(signal_at(1)).unwrap();

        // The engine may finish draining mid-loop and drop its receiver, so
        // later sends are allowed to fail.
        for minute in 1..=6 {
            let _ = h.candle_tx.send(candle_at(minute));
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        // Only the pre-shutdown signal produced a trade.
        let stats = h.stats.snapshot(1).await.unwrap();
        assert_eq!(stats.total_trades, 1);
    }
}
