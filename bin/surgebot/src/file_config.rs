use serde::Deserialize;

use detector::DetectorConfig;
use promotion::PromotionConfig;
use strategy::PopulationSpec;

/// Top-level pipeline config file (TOML).
///
/// Example `config/pipeline.toml`:
/// ```toml
/// [detector]
/// price_increase_1m = 3.0
/// volume_spike_multiplier = 3.0
/// min_volume_usdt = 50000.0
/// min_confidence = 70.0
///
/// [promotion]
/// max_bots = 10
/// min_trades_for_promotion = 20
/// min_win_rate_for_promotion = 60.0
/// min_profit_factor = 1.5
///
/// [population]
/// size = 100
/// seed = 42
/// ```
/// Every table is optional; missing tables take the stock defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineFileConfig {
    pub detector: DetectorConfig,
    pub promotion: PromotionConfig,
    pub population: PopulationSpec,
}

impl PipelineFileConfig {
    /// Load from a TOML file. Exits process on a missing or malformed file;
    /// threshold validation happens when each component is constructed.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read pipeline config at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse pipeline config at '{path}': {e}"))
    }
}
