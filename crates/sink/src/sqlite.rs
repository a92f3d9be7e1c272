use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use common::{Error, PersistedBot, RecordSink, Result, SinkRecord, Stage, StrategyConfig};

/// SQLite-backed repository sink.
///
/// All writes are append-only inserts keyed on natural ids with
/// `ON CONFLICT DO NOTHING`, so a replayed record never duplicates a row.
/// Promotion transitions additionally maintain the `bots` table that
/// `load_bots` reads back at cold start.
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_stage(raw: &str) -> Result<Stage> {
    match raw {
        "BACKTEST" => Ok(Stage::Backtest),
        "SIMULATED" => Ok(Stage::Simulated),
        "REAL" => Ok(Stage::Real),
        "RETIRED" => Ok(Stage::Retired),
        other => Err(Error::Other(format!("unknown stage '{other}' in bots table"))),
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn append(&self, record: &SinkRecord) -> Result<()> {
        match record {
            SinkRecord::Signal(signal) => {
                sqlx::query(
                    r#"
                    INSERT INTO signals
                        (id, symbol, detected_at, candle_close_time, direction, price,
                         price_change_pct, volume_ratio, volume_usdt, rsi, confidence)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(id) DO NOTHING
                    "#,
                )
                .bind(signal.id.to_string())
                .bind(&signal.symbol)
                .bind(signal.detected_at.to_rfc3339())
                .bind(signal.candle_close_time.to_rfc3339())
                .bind(signal.direction.to_string())
                .bind(signal.price)
                .bind(signal.price_change_pct)
                .bind(signal.volume_ratio)
                .bind(signal.volume_usdt)
                .bind(signal.rsi)
                .bind(signal.confidence)
                .execute(&self.pool)
                .await?;
            }

            SinkRecord::Trade(trade) => {
                sqlx::query(
                    r#"
                    INSERT INTO trades
                        (strategy_id, signal_id, bot_id, symbol, direction, entry_price,
                         exit_price, exit_reason, pnl_usdt, pnl_pct, held_candles,
                         entered_at, exited_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    ON CONFLICT(strategy_id, signal_id, bot_id) DO NOTHING
                    "#,
                )
                .bind(trade.strategy_id)
                .bind(trade.signal_id.to_string())
                .bind(trade.bot_id.map(|id| id.to_string()).unwrap_or_default())
                .bind(&trade.symbol)
                .bind(trade.direction.to_string())
                .bind(trade.entry_price)
                .bind(trade.exit_price)
                .bind(trade.exit_reason.to_string())
                .bind(trade.pnl_usdt)
                .bind(trade.pnl_pct)
                .bind(trade.held_candles)
                .bind(trade.entered_at.to_rfc3339())
                .bind(trade.exited_at.to_rfc3339())
                .execute(&self.pool)
                .await?;
            }

            SinkRecord::Transition(transition) => {
                let frozen = transition
                    .frozen_stats
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                sqlx::query(
                    r#"
                    INSERT INTO transitions
                        (strategy_id, bot_id, name, from_stage, to_stage, at, reason, frozen_stats)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(strategy_id, bot_id, from_stage, to_stage) DO NOTHING
                    "#,
                )
                .bind(transition.strategy_id)
                .bind(transition.bot_id.map(|id| id.to_string()).unwrap_or_default())
                .bind(&transition.name)
                .bind(transition.from.to_string())
                .bind(transition.to.to_string())
                .bind(transition.at.to_rfc3339())
                .bind(&transition.reason)
                .bind(frozen)
                .execute(&self.pool)
                .await?;

                let Some(bot_id) = transition.bot_id else {
                    return Ok(());
                };
                match (&transition.config, transition.to) {
                    (Some(config), to) if to.is_live() => {
                        let config_json = serde_json::to_string(config)?;
                        sqlx::query(
                            r#"
                            INSERT INTO bots (bot_id, name, stage, config_json, updated_at)
                            VALUES (?1, ?2, ?3, ?4, ?5)
                            ON CONFLICT(bot_id) DO UPDATE SET
                                stage = excluded.stage,
                                config_json = excluded.config_json,
                                updated_at = excluded.updated_at
                            "#,
                        )
                        .bind(bot_id.to_string())
                        .bind(&transition.name)
                        .bind(to.to_string())
                        .bind(config_json)
                        .bind(transition.at.to_rfc3339())
                        .execute(&self.pool)
                        .await?;
                    }
                    (_, to) => {
                        sqlx::query(
                            "UPDATE bots SET stage = ?1, updated_at = ?2 WHERE bot_id = ?3",
                        )
                        .bind(to.to_string())
                        .bind(transition.at.to_rfc3339())
                        .bind(bot_id.to_string())
                        .execute(&self.pool)
                        .await?;
                    }
                }
            }

            SinkRecord::BotStats {
                bot_id,
                name: _,
                stage,
                stats,
                at,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO bot_stats (bot_id, at, stage, stats_json)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(bot_id, at) DO NOTHING
                    "#,
                )
                .bind(bot_id.to_string())
                .bind(at.to_rfc3339())
                .bind(stage.to_string())
                .bind(serde_json::to_string(stats)?)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn load_bots(&self) -> Result<Vec<PersistedBot>> {
        let rows = sqlx::query(
            "SELECT bot_id, name, stage, config_json FROM bots WHERE stage IN ('SIMULATED', 'REAL')",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut bots = Vec::with_capacity(rows.len());
        for row in rows {
            let bot_id: String = row.try_get("bot_id")?;
            let name: String = row.try_get("name")?;
            let stage: String = row.try_get("stage")?;
            let config_json: String = row.try_get("config_json")?;

            let config: StrategyConfig = serde_json::from_str(&config_json)?;
            bots.push(PersistedBot {
                bot_id: Uuid::parse_str(&bot_id)
                    .map_err(|e| Error::Other(format!("invalid bot id '{bot_id}': {e}")))?,
                name,
                stage: parse_stage(&stage)?,
                config,
            });
        }
        Ok(bots)
    }
}
