use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use backtest::{OpenPosition, StatsStore};
use common::{
    Candle, Error, ExecutionClient, ExecutionFill, ExitReason, PersistedBot, PumpSignal, Result,
    SinkHandle, SinkRecord, Stage, StageTransition, StrategyConfig, StrategyStats, TradeIntent,
    TradeResult,
};

use crate::bots::{self, BotInstance, PendingOpen};

/// Promotion and demotion thresholds. Loaded from the `[promotion]` table
/// of the pipeline TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Cap on concurrently live (SIMULATED + REAL) bots.
    pub max_bots: usize,
    pub min_trades_for_promotion: u64,
    /// Percent, e.g. 60.0.
    pub min_win_rate_for_promotion: f64,
    pub min_profit_factor: f64,
    /// Additional trades a SIMULATED bot must accumulate in its own window
    /// before it can reach REAL.
    pub min_trades_for_real: u64,
    /// Trailing trade count for the demotion check.
    pub demote_window: usize,
    /// Percent; a full trailing window below this retires the bot.
    pub demote_win_rate: f64,
    /// Peak-to-trough of the bot's own cumulative pnl that retires it.
    pub demote_max_drawdown_usdt: f64,
    pub scan_interval_secs: u64,
    pub report_interval_secs: u64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            max_bots: 10,
            min_trades_for_promotion: 20,
            min_win_rate_for_promotion: 60.0,
            min_profit_factor: 1.5,
            min_trades_for_real: 10,
            demote_window: 10,
            demote_win_rate: 30.0,
            demote_max_drawdown_usdt: 100.0,
            scan_interval_secs: 3600,
            report_interval_secs: 3600,
        }
    }
}

impl PromotionConfig {
    /// Reject invalid thresholds outright — never silently clamp.
    pub fn validate(&self) -> Result<()> {
        if self.max_bots == 0 {
            return Err(Error::Config("max_bots must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&self.min_win_rate_for_promotion) {
            return Err(Error::Config(
                "min_win_rate_for_promotion must be within 0–100".into(),
            ));
        }
        if self.min_profit_factor <= 0.0 {
            return Err(Error::Config("min_profit_factor must be positive".into()));
        }
        if !(0.0..=100.0).contains(&self.demote_win_rate) {
            return Err(Error::Config("demote_win_rate must be within 0–100".into()));
        }
        if self.demote_max_drawdown_usdt <= 0.0 {
            return Err(Error::Config(
                "demote_max_drawdown_usdt must be positive".into(),
            ));
        }
        if self.scan_interval_secs == 0 || self.report_interval_secs == 0 {
            return Err(Error::Config("intervals must be at least 1 second".into()));
        }
        Ok(())
    }
}

/// Stage changes surfaced to the binary for operator-facing logging.
#[derive(Debug, Clone)]
pub enum StageEvent {
    Promoted {
        bot_id: Uuid,
        name: String,
        strategy_id: u32,
        from: Stage,
        to: Stage,
    },
    Retired {
        bot_id: Uuid,
        name: String,
        from: Stage,
        reason: String,
    },
}

/// Owns the bot registry and every stage decision.
///
/// A single task drives signals, candles, execution fills, the periodic
/// promotion scan and the performance report through one `select!` loop, so
/// every bot's statistics window has exactly one writer. Scans are fresh,
/// idempotent evaluations of current statistics — a missed scan delays a
/// transition, it never corrupts state.
pub struct PromotionManager {
    config: PromotionConfig,
    population: Arc<Vec<StrategyConfig>>,
    stats: Arc<StatsStore>,
    /// Strategy id → current stage. Absent means BACKTEST.
    stages: HashMap<u32, Stage>,
    bots: HashMap<Uuid, BotInstance>,
    execution: Arc<dyn ExecutionClient>,
    signal_rx: broadcast::Receiver<PumpSignal>,
    candle_rx: broadcast::Receiver<Candle>,
    fill_rx: mpsc::Receiver<ExecutionFill>,
    event_tx: mpsc::Sender<StageEvent>,
    sink: SinkHandle,
    shutdown_rx: watch::Receiver<bool>,
    draining: bool,
    signal_closed: bool,
    fill_closed: bool,
}

impl PromotionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PromotionConfig,
        population: Arc<Vec<StrategyConfig>>,
        stats: Arc<StatsStore>,
        restored: Vec<PersistedBot>,
        execution: Arc<dyn ExecutionClient>,
        signal_rx: broadcast::Receiver<PumpSignal>,
        candle_rx: broadcast::Receiver<Candle>,
        fill_rx: mpsc::Receiver<ExecutionFill>,
        event_tx: mpsc::Sender<StageEvent>,
        sink: SinkHandle,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        config.validate()?;

        let mut stages = HashMap::new();
        let mut bots = HashMap::new();
        for persisted in restored {
            info!(bot = %persisted.name, stage = %persisted.stage, "Bot restored from repository");
            stages.insert(persisted.config.id, persisted.stage);
            let bot = BotInstance::from_persisted(persisted);
            bots.insert(bot.bot_id, bot);
        }

        Ok(Self {
            config,
            population,
            stats,
            stages,
            bots,
            execution,
            signal_rx,
            candle_rx,
            fill_rx,
            event_tx,
            sink,
            shutdown_rx,
            draining: false,
            signal_closed: false,
            fill_closed: false,
        })
    }

    /// Run the manager loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            bots = self.bots.len(),
            max_bots = self.config.max_bots,
            "PromotionManager running"
        );

        let mut scan = tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs));
        scan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut report =
            tokio::time::interval(Duration::from_secs(self.config.report_interval_secs));
        report.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Both intervals fire immediately on their first tick — consume those.
        scan.tick().await;
        report.tick().await;

        loop {
            tokio::select! {
                res = self.signal_rx.recv(), if !self.signal_closed => match res {
                    Ok(signal) => self.on_signal(signal).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "Manager signal channel lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.signal_closed = true;
                    }
                },
                res = self.candle_rx.recv() => match res {
                    Ok(candle) => self.on_candle(candle).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "Manager candle channel lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Candle stream closed — manager stopped");
                        return;
                    }
                },
                res = self.fill_rx.recv(), if !self.fill_closed => match res {
                    Some(fill) => self.on_fill(fill).await,
                    None => self.fill_closed = true,
                },
                _ = scan.tick() => self.run_scan().await,
                _ = report.tick() => self.report(),
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Shutdown — no new entries accepted");
                        self.draining = true;
                    }
                }
            }

            if self.draining && self.bots.values().all(|b| !b.has_open_work()) {
                info!("Open positions resolved — manager stopped");
                return;
            }
        }
    }

    fn stage_of(&self, strategy_id: u32) -> Stage {
        self.stages.get(&strategy_id).copied().unwrap_or(Stage::Backtest)
    }

    fn live_count(&self) -> usize {
        self.bots.values().filter(|b| b.stage.is_live()).count()
    }

    fn passes_thresholds(&self, stats: &StrategyStats, min_trades: u64) -> bool {
        stats.total_trades >= min_trades
            && stats.win_rate() >= self.config.min_win_rate_for_promotion
            && stats
                .profit_factor()
                .is_some_and(|pf| pf >= self.config.min_profit_factor)
    }

    /// Periodic transition evaluation over every BACKTEST strategy and
    /// SIMULATED bot. Each pass reads momentary snapshots — the scan never
    /// holds a lock across the population.
    async fn run_scan(&mut self) {
        debug!(live = self.live_count(), "Promotion scan");

        for (strategy_id, stats) in self.stats.snapshot_all().await {
            if self.stage_of(strategy_id) != Stage::Backtest {
                continue;
            }
            if !self.passes_thresholds(&stats, self.config.min_trades_for_promotion) {
                continue;
            }
            self.promote_from_backtest(strategy_id, stats).await;
        }

        let simulated: Vec<Uuid> = self
            .bots
            .values()
            .filter(|b| b.stage == Stage::Simulated)
            .map(|b| b.bot_id)
            .collect();
        for bot_id in simulated {
            let promotable = match self.bots.get(&bot_id) {
                Some(bot) => self.passes_thresholds(&bot.stats, self.config.min_trades_for_real),
                None => continue,
            };
            if promotable {
                self.promote_to_real(bot_id).await;
            } else {
                // SIMULATED demotions run at scan cadence; REAL demotions
                // run on every trade result instead.
                self.check_demotion(bot_id).await;
            }
        }
    }

    async fn promote_from_backtest(&mut self, strategy_id: u32, frozen: StrategyStats) {
        let Some(config) = self.population.iter().find(|c| c.id == strategy_id).cloned() else {
            warn!(strategy = strategy_id, "Promotion candidate missing from population");
            return;
        };

        if self.live_count() >= self.config.max_bots {
            let candidate = bots::rank(&frozen);
            let Some(weakest_id) = bots::weakest_live_bot(&self.bots) else {
                return;
            };
            let weakest = match self.bots.get(&weakest_id) {
                Some(bot) => bots::effective_rank(bot),
                None => return,
            };
            if candidate <= weakest {
                debug!(
                    strategy = strategy_id,
                    "At capacity and candidate does not out-rank the weakest bot"
                );
                return;
            }
            self.retire(weakest_id, "evicted by a stronger promotion candidate".into())
                .await;
        }

        let name = format!("Bot-{}-S{:03}", config.direction, config.id);
        let mut bot = BotInstance::new(config.clone(), Stage::Simulated, name.clone());
        bot.credentials = frozen.clone();
        let bot_id = bot.bot_id;

        info!(
            bot = %name,
            strategy = strategy_id,
            trades = frozen.total_trades,
            win_rate = frozen.win_rate(),
            "Strategy promoted to SIMULATED"
        );
        self.stages.insert(strategy_id, Stage::Simulated);
        self.bots.insert(bot_id, bot);
        self.sink.append(SinkRecord::Transition(StageTransition {
            strategy_id,
            bot_id: Some(bot_id),
            name: name.clone(),
            from: Stage::Backtest,
            to: Stage::Simulated,
            at: Utc::now(),
            reason: "backtest thresholds met".into(),
            frozen_stats: Some(frozen),
            config: Some(config),
        }));
        let _ = self
            .event_tx
            .send(StageEvent::Promoted {
                bot_id,
                name,
                strategy_id,
                from: Stage::Backtest,
                to: Stage::Simulated,
            })
            .await;
    }

    async fn promote_to_real(&mut self, bot_id: Uuid) {
        let Some(bot) = self.bots.get_mut(&bot_id) else {
            return;
        };
        if !bot.stage.can_transition(Stage::Real) {
            return;
        }

        let frozen = bot.stats.clone();
        bot.stage = Stage::Real;
        bot.credentials = frozen.clone();
        bot.reset_window();

        let name = bot.name.clone();
        let strategy_id = bot.config.id;
        let config = bot.config.clone();

        info!(
            bot = %name,
            trades = frozen.total_trades,
            win_rate = frozen.win_rate(),
            "Bot promoted to REAL — live capital at risk"
        );
        self.stages.insert(strategy_id, Stage::Real);
        self.sink.append(SinkRecord::Transition(StageTransition {
            strategy_id,
            bot_id: Some(bot_id),
            name: name.clone(),
            from: Stage::Simulated,
            to: Stage::Real,
            at: Utc::now(),
            reason: "simulated thresholds met".into(),
            frozen_stats: Some(frozen),
            config: Some(config),
        }));
        let _ = self
            .event_tx
            .send(StageEvent::Promoted {
                bot_id,
                name,
                strategy_id,
                from: Stage::Simulated,
                to: Stage::Real,
            })
            .await;
    }

    async fn retire(&mut self, bot_id: Uuid, reason: String) {
        let Some(bot) = self.bots.remove(&bot_id) else {
            return;
        };
        let from = bot.stage;
        if !from.can_transition(Stage::Retired) {
            return;
        }

        warn!(bot = %bot.name, from = %from, reason = %reason, "Bot retired");
        self.stages.insert(bot.config.id, Stage::Retired);
        self.sink.append(SinkRecord::Transition(StageTransition {
            strategy_id: bot.config.id,
            bot_id: Some(bot.bot_id),
            name: bot.name.clone(),
            from,
            to: Stage::Retired,
            at: Utc::now(),
            reason: reason.clone(),
            frozen_stats: Some(bot.stats.clone()),
            config: None,
        }));
        let _ = self
            .event_tx
            .send(StageEvent::Retired {
                bot_id,
                name: bot.name,
                from,
                reason,
            })
            .await;
    }

    /// Risk control: trailing win rate or drawdown breach retires the bot.
    async fn check_demotion(&mut self, bot_id: Uuid) {
        let Some(bot) = self.bots.get(&bot_id) else {
            return;
        };

        let mut reason = None;
        if let Some(wr) = bot.trailing_win_rate(self.config.demote_window) {
            if wr < self.config.demote_win_rate {
                reason = Some(format!(
                    "trailing win rate {:.1}% below {:.1}%",
                    wr, self.config.demote_win_rate
                ));
            }
        }
        if bot.stats.max_drawdown >= self.config.demote_max_drawdown_usdt {
            reason = Some(format!(
                "drawdown {:.2} USDT beyond {:.2} USDT",
                bot.stats.max_drawdown, self.config.demote_max_drawdown_usdt
            ));
        }

        if let Some(reason) = reason {
            self.retire(bot_id, reason).await;
        }
    }

    /// Fan a signal out over the live bots: SIMULATED bots fill on paper at
    /// the signal price, REAL bots emit a trade intent and wait for the fill.
    async fn on_signal(&mut self, signal: PumpSignal) {
        if self.draining {
            return;
        }

        let bot_ids: Vec<Uuid> = self.bots.keys().copied().collect();
        for bot_id in bot_ids {
            let Some(bot) = self.bots.get_mut(&bot_id) else {
                continue;
            };
            if !bot.stage.is_live() || !bot.config.entry_matches(&signal) {
                continue;
            }
            // One position per symbol, and never while a fill is in flight.
            if bot.positions.contains_key(&signal.symbol)
                || bot.pending_open.contains_key(&signal.symbol)
                || bot.pending_close.contains_key(&signal.symbol)
            {
                continue;
            }

            match bot.stage {
                Stage::Simulated => {
                    let position = OpenPosition::open(
                        &bot.config,
                        &signal,
                        signal.price,
                        signal.detected_at,
                        Some(bot.bot_id),
                    );
                    info!(
                        bot = %bot.name,
                        symbol = %signal.symbol,
                        entry = signal.price,
                        "Paper position opened"
                    );
                    bot.positions.insert(signal.symbol.clone(), position);
                }
                Stage::Real => {
                    let intent = TradeIntent {
                        bot_id,
                        symbol: signal.symbol.clone(),
                        direction: bot.config.direction,
                        size_usdt: bot.config.position_size_usdt,
                        timestamp: signal.detected_at,
                    };
                    bot.pending_open
                        .insert(signal.symbol.clone(), PendingOpen { signal: signal.clone() });
                    let name = bot.name.clone();

                    if let Err(e) = self.execution.submit(&intent).await {
                        warn!(bot = %name, error = %e, "Trade intent submission failed");
                        if let Some(bot) = self.bots.get_mut(&bot_id) {
                            bot.pending_open.remove(&signal.symbol);
                        }
                    } else {
                        info!(bot = %name, symbol = %signal.symbol, "Trade intent emitted");
                    }
                }
                _ => {}
            }
        }
    }

    /// Walk every open position on this symbol's candle. SIMULATED exits
    /// close immediately; REAL exits emit a closing intent and wait for the
    /// fill before the trade is counted.
    async fn on_candle(&mut self, candle: Candle) {
        let mut closed: Vec<(Uuid, TradeResult)> = Vec::new();
        let mut close_intents: Vec<(String, TradeIntent)> = Vec::new();

        for bot in self.bots.values_mut() {
            if !bot.stage.is_live() {
                continue;
            }
            if bot.stage == Stage::Real && bot.pending_close.contains_key(&candle.symbol) {
                continue;
            }
            let exit = bot
                .positions
                .get_mut(&candle.symbol)
                .and_then(|p| p.on_candle(&candle));
            let Some((exit_price, reason)) = exit else {
                continue;
            };

            match bot.stage {
                Stage::Simulated => {
                    if let Some(position) = bot.positions.remove(&candle.symbol) {
                        closed.push((
                            bot.bot_id,
                            position.into_result(exit_price, reason, candle.close_time),
                        ));
                    }
                }
                Stage::Real => {
                    bot.pending_close.insert(candle.symbol.clone(), reason);
                    close_intents.push((
                        bot.name.clone(),
                        TradeIntent {
                            bot_id: bot.bot_id,
                            symbol: candle.symbol.clone(),
                            direction: bot.config.direction.opposite(),
                            size_usdt: bot.config.position_size_usdt,
                            timestamp: candle.close_time,
                        },
                    ));
                }
                _ => {}
            }
        }

        for (name, intent) in close_intents {
            if let Err(e) = self.execution.submit(&intent).await {
                // The close stays pending; the next fill or candle retries
                // nothing — execution is expected to deliver eventually.
                warn!(bot = %name, error = %e, "Close intent submission failed");
            } else {
                info!(bot = %name, symbol = %intent.symbol, "Close intent emitted");
            }
        }
        for (bot_id, result) in closed {
            self.finalize_result(bot_id, result).await;
        }
    }

    /// Reconcile an asynchronous fill: a fill in the bot's direction opens
    /// the position at the reported price, the opposite direction closes it.
    async fn on_fill(&mut self, fill: ExecutionFill) {
        let Some(bot) = self.bots.get_mut(&fill.bot_id) else {
            warn!(bot = %fill.bot_id, "Fill for unknown bot ignored");
            return;
        };

        if fill.direction == bot.config.direction {
            let Some(pending) = bot.pending_open.remove(&fill.symbol) else {
                warn!(bot = %bot.name, symbol = %fill.symbol, "Entry fill without pending intent ignored");
                return;
            };
            if bot.positions.contains_key(&fill.symbol) {
                warn!(bot = %bot.name, symbol = %fill.symbol, "Duplicate entry fill ignored");
                return;
            }
            let position = OpenPosition::open(
                &bot.config,
                &pending.signal,
                fill.price,
                fill.timestamp,
                Some(bot.bot_id),
            );
            info!(bot = %bot.name, symbol = %fill.symbol, price = fill.price, "Real position opened");
            bot.positions.insert(fill.symbol.clone(), position);
        } else {
            let reason = bot
                .pending_close
                .remove(&fill.symbol)
                .unwrap_or(ExitReason::Timeout);
            let Some(position) = bot.positions.remove(&fill.symbol) else {
                warn!(bot = %bot.name, symbol = %fill.symbol, "Exit fill without open position ignored");
                return;
            };
            let result = position.into_result(fill.price, reason, fill.timestamp);
            let bot_id = bot.bot_id;
            self.finalize_result(bot_id, result).await;
        }
    }

    /// Count a closed bot trade: the bot's window, the sink, and — for REAL
    /// bots — the immediate demotion check, as one unit.
    async fn finalize_result(&mut self, bot_id: Uuid, result: TradeResult) {
        let stage = {
            let Some(bot) = self.bots.get_mut(&bot_id) else {
                return;
            };
            bot.record_result(&result, self.config.demote_window);
            info!(
                bot = %bot.name,
                stage = %bot.stage,
                symbol = %result.symbol,
                reason = %result.exit_reason,
                pnl_usdt = result.pnl_usdt,
                trades = bot.stats.total_trades,
                win_rate = bot.stats.win_rate(),
                "Position closed"
            );
            bot.stage
        };
        self.sink.append(SinkRecord::Trade(result));

        if stage == Stage::Real {
            self.check_demotion(bot_id).await;
        }
    }

    /// Periodic performance report: REAL bots first, then SIMULATED, best
    /// pnl first. Each line is also appended to the sink as a snapshot.
    fn report(&self) {
        if self.bots.is_empty() {
            return;
        }

        let mut live: Vec<&BotInstance> =
            self.bots.values().filter(|b| b.stage.is_live()).collect();
        live.sort_by(|a, b| {
            let stage_order = |s: Stage| if s == Stage::Real { 0 } else { 1 };
            stage_order(a.stage)
                .cmp(&stage_order(b.stage))
                .then(b.stats.total_pnl.total_cmp(&a.stats.total_pnl))
        });

        info!(bots = live.len(), "Bot performance report");
        for bot in live {
            info!(
                bot = %bot.name,
                stage = %bot.stage,
                trades = bot.stats.total_trades,
                win_rate = bot.stats.win_rate(),
                pnl_usdt = bot.stats.total_pnl,
                "Bot stats"
            );
            self.sink.append(SinkRecord::BotStats {
                bot_id: bot.bot_id,
                name: bot.name.clone(),
                stage: bot.stage,
                stats: bot.stats.clone(),
                at: Utc::now(),
            });
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use common::Direction;

    struct ChannelExecution {
        tx: mpsc::Sender<TradeIntent>,
    }

    #[async_trait]
    impl ExecutionClient for ChannelExecution {
        async fn submit(&self, intent: &TradeIntent) -> Result<()> {
            self.tx
                .send(intent.clone())
                .await
                .map_err(|e| Error::Execution(e.to_string()))
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

    fn persisted(config: StrategyConfig, stage: Stage) -> PersistedBot {
        PersistedBot {
            bot_id: Uuid::new_v4(),
            name: format!("Bot-{}-S{:03}", config.direction, config.id),
            stage,
            config,
        }
    }

    fn signal(symbol: &str, direction: Direction) -> PumpSignal {
        PumpSignal {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
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

    fn candle(symbol: &str, minute: i64, high: f64, low: f64, close: f64) -> Candle {
        let open_time = chrono::Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
            + ChronoDuration::minutes(minute);
        Candle {
            symbol: symbol.into(),
            open: close,
            high,
            low,
            close,
            volume: 100.0,
            open_time,
            close_time: open_time + ChronoDuration::minutes(1),
        }
    }

    fn trade(strategy_id: u32, pnl: f64) -> TradeResult {
        TradeResult {
            strategy_id,
            signal_id: Uuid::new_v4(),
            bot_id: None,
            symbol: "TESTUSDT".into(),
            direction: Direction::Long,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            exit_reason: ExitReason::Timeout,
            pnl_usdt: pnl,
            pnl_pct: pnl,
            held_candles: 1,
            entered_at: Utc::now(),
            exited_at: Utc::now(),
        }
    }

    struct Harness {
        manager: PromotionManager,
        sink_rx: mpsc::Receiver<SinkRecord>,
        event_rx: mpsc::Receiver<StageEvent>,
        intent_rx: mpsc::Receiver<TradeIntent>,
        stats: Arc<StatsStore>,
        _signal_tx: broadcast::Sender<PumpSignal>,
        _candle_tx: broadcast::Sender<Candle>,
        _fill_tx: mpsc::Sender<ExecutionFill>,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn harness(
        config: PromotionConfig,
        population: Vec<StrategyConfig>,
        restored: Vec<PersistedBot>,
    ) -> Harness {
        let population = Arc::new(population);
        let stats = Arc::new(StatsStore::new(&population));
        let (sink, sink_rx) = SinkHandle::new(256);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (intent_tx, intent_rx) = mpsc::channel(64);
        let (signal_tx, signal_rx) = broadcast::channel(64);
        let (candle_tx, candle_rx) = broadcast::channel(64);
        let (fill_tx, fill_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager = PromotionManager::new(
            config,
            population,
            stats.clone(),
            restored,
            Arc::new(ChannelExecution { tx: intent_tx }),
            signal_rx,
            candle_rx,
            fill_rx,
            event_tx,
            sink,
            shutdown_rx,
        )
        .unwrap();

        Harness {
            manager,
            sink_rx,
            event_rx,
            intent_rx,
            stats,
            _signal_tx: signal_tx,
            _candle_tx: candle_tx,
            _fill_tx: fill_tx,
            _shutdown_tx: shutdown_tx,
        }
    }

    async fn seed_backtest(
        stats: &StatsStore,
        strategy_id: u32,
        wins: u32,
        win_pnl: f64,
        losses: u32,
        loss_pnl: f64,
    ) {
        for _ in 0..wins {
            assert!(stats.apply(&trade(strategy_id, win_pnl)).await);
        }
        for _ in 0..losses {
            assert!(stats.apply(&trade(strategy_id, -loss_pnl)).await);
        }
    }

    fn drain_sink(rx: &mut mpsc::Receiver<SinkRecord>) -> Vec<SinkRecord> {
        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn backtest_promotion_creates_bot_with_fresh_window() {
        let mut h = harness(
            PromotionConfig::default(),
            vec![strategy(1, Direction::Long)],
            vec![],
        );
        // 25 trades, 16 wins (64%), profit factor 72/40 = 1.8.
        seed_backtest(&h.stats, 1, 16, 4.5, 9, 40.0 / 9.0).await;

        h.manager.run_scan().await;

        assert_eq!(h.manager.bots.len(), 1);
        let bot = h.manager.bots.values().next().unwrap();
        assert_eq!(bot.stage, Stage::Simulated);
        assert_eq!(bot.stats.total_trades, 0, "promotion must reset the window");
        assert_eq!(h.manager.stage_of(1), Stage::Simulated);

        let records = drain_sink(&mut h.sink_rx);
        let transition = records
            .iter()
            .find_map(|r| match r {
                SinkRecord::Transition(t) => Some(t),
                _ => None,
            })
            .expect("expected a transition record");
        assert_eq!(transition.from, Stage::Backtest);
        assert_eq!(transition.to, Stage::Simulated);
        assert_eq!(transition.frozen_stats.as_ref().unwrap().total_trades, 25);
        assert!(transition.config.is_some(), "promotion record carries the config");

        assert!(matches!(
            h.event_rx.try_recv(),
            Ok(StageEvent::Promoted { .. })
        ));
    }

    #[tokio::test]
    async fn missing_profit_factor_is_not_promotable() {
        let mut h = harness(
            PromotionConfig::default(),
            vec![strategy(1, Direction::Long)],
            vec![],
        );
        // 25 wins and zero losses: gross loss 0 means insufficient data.
        seed_backtest(&h.stats, 1, 25, 5.0, 0, 0.0).await;

        h.manager.run_scan().await;
        assert!(h.manager.bots.is_empty());
        assert_eq!(h.manager.stage_of(1), Stage::Backtest);
    }

    #[tokio::test]
    async fn low_win_rate_is_not_promotable() {
        let mut h = harness(
            PromotionConfig::default(),
            vec![strategy(1, Direction::Long)],
            vec![],
        );
        // 40% win rate with a strong profit factor still fails.
        seed_backtest(&h.stats, 1, 10, 20.0, 15, 2.0).await;

        h.manager.run_scan().await;
        assert!(h.manager.bots.is_empty());
    }

    #[tokio::test]
    async fn capacity_admission_is_ranked_and_deterministic() {
        let config = PromotionConfig {
            max_bots: 1,
            min_trades_for_promotion: 3,
            min_win_rate_for_promotion: 50.0,
            min_profit_factor: 1.2,
            ..PromotionConfig::default()
        };
        let mut h = harness(
            config,
            vec![
                strategy(1, Direction::Long),
                strategy(2, Direction::Long),
                strategy(3, Direction::Long),
            ],
            vec![],
        );

        // Strategy 1 qualifies first: pf 3.0.
        seed_backtest(&h.stats, 1, 2, 3.0, 1, 2.0).await;
        h.manager.run_scan().await;
        assert_eq!(h.manager.live_count(), 1);

        // Strategy 2 out-ranks the incumbent (pf 20): eviction + promotion.
        seed_backtest(&h.stats, 2, 2, 10.0, 1, 1.0).await;
        h.manager.run_scan().await;
        assert_eq!(h.manager.live_count(), 1);
        assert_eq!(h.manager.stage_of(1), Stage::Retired);
        assert_eq!(h.manager.stage_of(2), Stage::Simulated);

        // Strategy 3 qualifies but does not out-rank: stays in BACKTEST.
        seed_backtest(&h.stats, 3, 2, 2.0, 1, 1.5).await;
        h.manager.run_scan().await;
        assert_eq!(h.manager.live_count(), 1);
        assert_eq!(h.manager.stage_of(2), Stage::Simulated);
        assert_eq!(h.manager.stage_of(3), Stage::Backtest);

        // RETIRED is terminal — strategy 1 never comes back.
        h.manager.run_scan().await;
        assert_eq!(h.manager.stage_of(1), Stage::Retired);

        let retirements: Vec<StageEvent> = {
            let mut events = Vec::new();
            while let Ok(ev) = h.event_rx.try_recv() {
                events.push(ev);
            }
            events
                .into_iter()
                .filter(|e| matches!(e, StageEvent::Retired { .. }))
                .collect()
        };
        assert_eq!(retirements.len(), 1);
    }

    #[tokio::test]
    async fn simulated_bot_paper_lifecycle() {
        let config = strategy(1, Direction::Long);
        let mut h = harness(
            PromotionConfig::default(),
            vec![config.clone()],
            vec![persisted(config, Stage::Simulated)],
        );

        h.manager.on_signal(signal("AAAUSDT", Direction::Long)).await;
        let bot = h.manager.bots.values().next().unwrap();
        assert_eq!(bot.positions.len(), 1);

        // A second signal on the same symbol does not double-enter.
        h.manager.on_signal(signal("AAAUSDT", Direction::Long)).await;
        assert_eq!(h.manager.bots.values().next().unwrap().positions.len(), 1);

        // Take-profit at 102 hit on the next candle.
        h.manager
            .on_candle(candle("AAAUSDT", 1, 102.5, 99.9, 102.0))
            .await;

        let bot = h.manager.bots.values().next().unwrap();
        assert!(bot.positions.is_empty());
        assert_eq!(bot.stats.total_trades, 1);
        assert_eq!(bot.stats.wins, 1);

        let records = drain_sink(&mut h.sink_rx);
        let result = records
            .iter()
            .find_map(|r| match r {
                SinkRecord::Trade(t) => Some(t),
                _ => None,
            })
            .expect("expected a trade record");
        assert!(result.bot_id.is_some());
        assert_eq!(result.exit_reason, ExitReason::TakeProfit);
    }

    #[tokio::test]
    async fn real_bot_emits_intents_and_reconciles_fills() {
        let config = strategy(1, Direction::Long);
        let restored = persisted(config.clone(), Stage::Real);
        let bot_id = restored.bot_id;
        let mut h = harness(PromotionConfig::default(), vec![config], vec![restored]);

        // Entry: signal emits an intent, no position until the fill lands.
        h.manager.on_signal(signal("AAAUSDT", Direction::Long)).await;
        let intent = h.intent_rx.try_recv().expect("expected an entry intent");
        assert_eq!(intent.bot_id, bot_id);
        assert_eq!(intent.direction, Direction::Long);
        assert!(h.manager.bots[&bot_id].positions.is_empty());

        h.manager
            .on_fill(ExecutionFill {
                bot_id,
                symbol: "AAAUSDT".into(),
                direction: Direction::Long,
                price: 100.0,
                timestamp: Utc::now(),
            })
            .await;
        assert_eq!(h.manager.bots[&bot_id].positions.len(), 1);

        // Stop-loss at 99 triggers a close intent; the trade is not counted
        // until the exit fill arrives.
        h.manager
            .on_candle(candle("AAAUSDT", 1, 100.2, 98.5, 98.8))
            .await;
        let close = h.intent_rx.try_recv().expect("expected a close intent");
        assert_eq!(close.direction, Direction::Short);
        assert_eq!(h.manager.bots[&bot_id].stats.total_trades, 0);

        h.manager
            .on_fill(ExecutionFill {
                bot_id,
                symbol: "AAAUSDT".into(),
                direction: Direction::Short,
                price: 98.9,
                timestamp: Utc::now(),
            })
            .await;

        let bot = &h.manager.bots[&bot_id];
        assert!(bot.positions.is_empty());
        assert_eq!(bot.stats.total_trades, 1);
        assert_eq!(bot.stats.losses, 1);
    }

    #[tokio::test]
    async fn real_bot_drawdown_breach_retires_immediately() {
        let config = PromotionConfig {
            demote_max_drawdown_usdt: 1.0,
            ..PromotionConfig::default()
        };
        let strat = strategy(1, Direction::Long);
        let restored = persisted(strat.clone(), Stage::Real);
        let bot_id = restored.bot_id;
        let mut h = harness(config, vec![strat], vec![restored]);

        let mut result = trade(1, -2.0);
        result.bot_id = Some(bot_id);
        h.manager.finalize_result(bot_id, result).await;

        assert!(h.manager.bots.is_empty(), "bot must be retired on the spot");
        assert_eq!(h.manager.stage_of(1), Stage::Retired);
        let retired = loop {
            match h.event_rx.try_recv() {
                Ok(StageEvent::Retired { from, .. }) => break from,
                Ok(_) => continue,
                Err(_) => panic!("expected a Retired event"),
            }
        };
        assert_eq!(retired, Stage::Real);
    }

    #[tokio::test]
    async fn trailing_win_rate_demotion_needs_full_window() {
        let config = PromotionConfig {
            demote_window: 2,
            demote_win_rate: 50.0,
            demote_max_drawdown_usdt: 1_000_000.0,
            ..PromotionConfig::default()
        };
        let strat = strategy(1, Direction::Long);
        let restored = persisted(strat.clone(), Stage::Real);
        let bot_id = restored.bot_id;
        let mut h = harness(config, vec![strat], vec![restored]);

        h.manager.finalize_result(bot_id, trade(1, 1.0)).await;
        assert_eq!(h.manager.bots.len(), 1);

        // Window [win, loss]: 50% is not below 50%.
        h.manager.finalize_result(bot_id, trade(1, -1.0)).await;
        assert_eq!(h.manager.bots.len(), 1);

        // Window [loss, loss]: 0% breaches the floor.
        h.manager.finalize_result(bot_id, trade(1, -1.0)).await;
        assert!(h.manager.bots.is_empty());
    }

    #[tokio::test]
    async fn simulated_bot_promotes_to_real_on_its_own_window() {
        let config = PromotionConfig {
            min_trades_for_real: 3,
            min_win_rate_for_promotion: 60.0,
            min_profit_factor: 1.2,
            ..PromotionConfig::default()
        };
        let strat = strategy(1, Direction::Long);
        let restored = persisted(strat.clone(), Stage::Simulated);
        let bot_id = restored.bot_id;
        let mut h = harness(config, vec![strat], vec![restored]);

        // 3 trades in the bot's own window: 66.7% wins, pf 5.0.
        h.manager.finalize_result(bot_id, trade(1, 5.0)).await;
        h.manager.finalize_result(bot_id, trade(1, 5.0)).await;
        h.manager.finalize_result(bot_id, trade(1, -2.0)).await;

        h.manager.run_scan().await;

        let bot = &h.manager.bots[&bot_id];
        assert_eq!(bot.stage, Stage::Real);
        assert_eq!(bot.stats.total_trades, 0, "REAL starts a fresh window");
        assert_eq!(h.manager.stage_of(1), Stage::Real);

        let records = drain_sink(&mut h.sink_rx);
        let to_real = records
            .iter()
            .find_map(|r| match r {
                SinkRecord::Transition(t) if t.to == Stage::Real => Some(t),
                _ => None,
            })
            .expect("expected a SIMULATED→REAL transition");
        assert_eq!(to_real.from, Stage::Simulated);
        assert_eq!(to_real.frozen_stats.as_ref().unwrap().total_trades, 3);
    }

    #[tokio::test]
    async fn live_bots_never_exceed_max_bots() {
        let config = PromotionConfig {
            max_bots: 3,
            min_trades_for_promotion: 3,
            min_win_rate_for_promotion: 50.0,
            min_profit_factor: 1.2,
            ..PromotionConfig::default()
        };
        let population: Vec<StrategyConfig> =
            (1..=20).map(|id| strategy(id, Direction::Long)).collect();
        let mut h = harness(config, population, vec![]);

        // Every strategy qualifies, with profit factor rising by id.
        for id in 1..=20u32 {
            seed_backtest(&h.stats, id, 2, 1.0 + id as f64, 1, 1.0).await;
            h.manager.run_scan().await;
            assert!(
                h.manager.live_count() <= 3,
                "capacity exceeded after strategy {id}"
            );
        }

        // The strongest three candidates hold the slots in the end.
        let live_ids: Vec<u32> = {
            let mut ids: Vec<u32> = h
                .manager
                .bots
                .values()
                .filter(|b| b.stage.is_live())
                .map(|b| b.config.id)
                .collect();
            ids.sort_unstable();
            ids
        };
        assert_eq!(live_ids, vec![18, 19, 20]);
    }
}
