use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use common::{Direction, Result, StrategyConfig};

use crate::config::PopulationSpec;

/// Build the strategy population: `spec.size` configurations, half LONG and
/// half SHORT, ids dense from 1 and never reused. Sampling is driven by a
/// seeded RNG so the same spec always reproduces the same population.
pub fn generate(spec: &PopulationSpec) -> Result<Vec<StrategyConfig>> {
    spec.validate()?;

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let mut configs = Vec::with_capacity(spec.size);
    let half = spec.size / 2;
    let mut next_id: u32 = 1;

    for (direction, count) in [
        (Direction::Long, half),
        (Direction::Short, spec.size - half),
    ] {
        for _ in 0..count {
            configs.push(sample(&mut rng, spec, direction, next_id));
            next_id += 1;
        }
    }

    info!(
        size = configs.len(),
        seed = spec.seed,
        "Strategy population generated"
    );
    Ok(configs)
}

fn sample(
    rng: &mut StdRng,
    spec: &PopulationSpec,
    direction: Direction,
    id: u32,
) -> StrategyConfig {
    let rsi_floor = if spec.rsi_filter_optional && rng.gen_bool(0.5) {
        None
    } else {
        Some(pick(rng, &spec.rsi_floors))
    };

    StrategyConfig {
        id,
        direction,
        min_confidence: pick(rng, &spec.min_confidence),
        min_volume_ratio: pick(rng, &spec.min_volume_ratio),
        min_price_change_pct: pick(rng, &spec.min_price_change_pct),
        rsi_floor,
        take_profit_pct: pick(rng, &spec.take_profit_pct),
        stop_loss_pct: pick(rng, &spec.stop_loss_pct),
        max_hold_candles: pick(rng, &spec.max_hold_candles),
        trailing_stop: pick(rng, &spec.trailing_stop),
        position_size_usdt: spec.position_size_usdt,
    }
}

// Ranges are validated non-empty before sampling starts.
fn pick<T: Copy>(rng: &mut StdRng, values: &[T]) -> T {
    values[rng.gen_range(0..values.len())]
}
