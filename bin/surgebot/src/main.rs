mod feed;
mod file_config;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backtest::{BacktestEngine, StatsStore};
use common::{
    Candle, Config, ExecutionClient, ExecutionFill, PumpSignal, RecordSink, Result, SinkHandle,
    TradeIntent,
};
use detector::PumpDetector;
use promotion::{PromotionManager, StageEvent};
use sink::{SinkWorker, SqliteSink};

use file_config::PipelineFileConfig;

/// Stand-in execution collaborator: logs intents and never reports fills.
/// A real execution service replaces this and feeds `ExecutionFill`s back
/// through the fill channel.
struct LogExecution;

#[async_trait]
impl ExecutionClient for LogExecution {
    async fn submit(&self, intent: &TradeIntent) -> Result<()> {
        info!(
            bot = %intent.bot_id,
            symbol = %intent.symbol,
            direction = %intent.direction,
            size_usdt = intent.size_usdt,
            "Trade intent (no execution backend wired)"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let pipeline = PipelineFileConfig::load(&cfg.pipeline_config_path);
    info!(config = %cfg.pipeline_config_path, "SurgeBot starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    // ── Repository sink ───────────────────────────────────────────────────────
    let sqlite_sink = Arc::new(SqliteSink::new(db.clone()));
    let (sink, sink_rx) = SinkHandle::new(cfg.sink_queue_capacity);
    let sink_worker = SinkWorker::new(sink_rx, sqlite_sink.clone());
    let degraded = sink_worker.degraded_flag();

    // ── Cold restart: promoted bots come back with stage and config only ─────
    let restored = sqlite_sink
        .load_bots()
        .await
        .unwrap_or_else(|e| panic!("Failed to load bots from repository: {e}"));
    info!(bots = restored.len(), "Bots restored from repository");

    // ── Strategy population ───────────────────────────────────────────────────
    let population = Arc::new(
        strategy::generate(&pipeline.population)
            .unwrap_or_else(|e| panic!("Invalid population spec: {e}")),
    );
    let stats = Arc::new(StatsStore::new(&population));

    // ── Channels ──────────────────────────────────────────────────────────────
    let (candle_tx, _) = broadcast::channel::<Candle>(1024);
    let (signal_tx, _) = broadcast::channel::<PumpSignal>(256);
    let (fill_tx, fill_rx) = mpsc::channel::<ExecutionFill>(64);
    let (event_tx, mut event_rx) = mpsc::channel::<StageEvent>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Pump detector ─────────────────────────────────────────────────────────
    let detector = PumpDetector::new(pipeline.detector.clone())
        .unwrap_or_else(|e| panic!("Invalid detector config: {e}"));

    // ── Backtest engine ───────────────────────────────────────────────────────
    let engine = BacktestEngine::new(
        population.clone(),
        stats.clone(),
        sink.clone(),
        signal_tx.subscribe(),
        candle_tx.subscribe(),
        shutdown_rx.clone(),
    );

    // ── Promotion manager ─────────────────────────────────────────────────────
    let manager = PromotionManager::new(
        pipeline.promotion.clone(),
        population.clone(),
        stats.clone(),
        restored,
        Arc::new(LogExecution),
        signal_tx.subscribe(),
        candle_tx.subscribe(),
        fill_rx,
        event_tx,
        sink.clone(),
        shutdown_rx.clone(),
    )
    .unwrap_or_else(|e| panic!("Invalid promotion config: {e}"));

    // Kept alive for the execution collaborator to report fills into.
    let _fill_tx = fill_tx;

    // ── Stage event logger ────────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                StageEvent::Promoted { name, from, to, .. } => {
                    info!(bot = %name, from = %from, to = %to, "Stage promotion");
                }
                StageEvent::Retired { name, from, reason, .. } => {
                    warn!(bot = %name, from = %from, reason = %reason, "Stage retirement");
                }
            }
        }
    });

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    tokio::spawn(sink_worker.run());
    tokio::spawn(detector.run(candle_tx.subscribe(), signal_tx.clone(), sink.clone()));
    tokio::spawn(engine.run());
    tokio::spawn(manager.run());
    tokio::spawn(feed::run_stdin_feed(candle_tx.clone()));

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.unwrap();

    // No new signals are accepted past this point; admitted work completes.
    info!("Shutdown signal received — draining in-flight work");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    if degraded.load(std::sync::atomic::Ordering::Relaxed) {
        warn!(
            dropped = sink.dropped(),
            "Exiting in degraded mode — some records were not persisted"
        );
    }
    info!("Shutdown complete");
}
