use common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Parameter ranges and sizing for the strategy population, loaded from the
/// `[population]` table of the pipeline TOML file. Every field defaults to
/// the stock sweep so a missing table still yields a usable population.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationSpec {
    /// Total number of strategies; split 50/50 between LONG and SHORT.
    pub size: usize,
    /// RNG seed — identical spec and seed must reproduce the exact
    /// population, so backtests stay comparable across runs.
    pub seed: u64,

    pub take_profit_pct: Vec<f64>,
    pub stop_loss_pct: Vec<f64>,
    pub rsi_floors: Vec<f64>,
    /// Whether sampled strategies may skip the RSI filter entirely.
    pub rsi_filter_optional: bool,
    pub min_volume_ratio: Vec<f64>,
    pub min_price_change_pct: Vec<f64>,
    pub min_confidence: Vec<f64>,
    pub max_hold_candles: Vec<u32>,
    pub trailing_stop: Vec<bool>,
    pub position_size_usdt: f64,
}

impl Default for PopulationSpec {
    fn default() -> Self {
        Self {
            size: 100,
            seed: 42,
            take_profit_pct: vec![2.0, 3.0, 5.0, 7.0, 10.0, 15.0, 20.0],
            stop_loss_pct: vec![1.0, 2.0, 3.0, 4.0, 5.0, 7.0, 10.0],
            rsi_floors: vec![20.0, 30.0, 40.0, 50.0, 60.0, 70.0],
            rsi_filter_optional: true,
            min_volume_ratio: vec![1.0, 1.5, 2.0, 3.0, 4.0],
            min_price_change_pct: vec![0.3, 0.5, 1.0, 1.5, 2.0],
            min_confidence: vec![30.0, 40.0, 50.0, 60.0, 70.0],
            max_hold_candles: vec![15, 30, 60],
            trailing_stop: vec![true, false],
            position_size_usdt: 50.0,
        }
    }
}

impl PopulationSpec {
    /// Reject an unusable spec outright — never silently fall back.
    pub fn validate(&self) -> Result<()> {
        if self.size < 2 {
            return Err(Error::Config(format!(
                "population size must be >= 2, got {}",
                self.size
            )));
        }
        let ranges: [(&str, bool); 7] = [
            ("take_profit_pct", self.take_profit_pct.is_empty()),
            ("stop_loss_pct", self.stop_loss_pct.is_empty()),
            ("rsi_floors", self.rsi_floors.is_empty()),
            ("min_volume_ratio", self.min_volume_ratio.is_empty()),
            ("min_price_change_pct", self.min_price_change_pct.is_empty()),
            ("min_confidence", self.min_confidence.is_empty()),
            ("trailing_stop", self.trailing_stop.is_empty()),
        ];
        for (name, empty) in ranges {
            if empty {
                return Err(Error::Config(format!("population range '{name}' is empty")));
            }
        }
        if self.max_hold_candles.is_empty() || self.max_hold_candles.contains(&0) {
            return Err(Error::Config(
                "max_hold_candles must be non-empty and positive".into(),
            ));
        }
        if self.take_profit_pct.iter().any(|v| *v <= 0.0)
            || self.stop_loss_pct.iter().any(|v| *v <= 0.0)
        {
            return Err(Error::Config(
                "take_profit_pct and stop_loss_pct values must be positive".into(),
            ));
        }
        if self.min_confidence.iter().any(|v| !(0.0..=100.0).contains(v)) {
            return Err(Error::Config(
                "min_confidence values must be within 0–100".into(),
            ));
        }
        if self.position_size_usdt <= 0.0 {
            return Err(Error::Config("position_size_usdt must be positive".into()));
        }
        Ok(())
    }
}
