//! Monte Carlo robustness analysis: bootstrap-resample the opportunity
//! history by calendar date and re-run the engine many times in parallel.
//!
//! Each worker owns its private resampled data and engine instance, so
//! there is no shared mutable state; results are joined and aggregated,
//! completion order irrelevant.

use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use options_core::BacktestError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rust_decimal::prelude::*;
use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::warn;

use crate::engine::BacktestEngine;
use crate::models::{
    BacktestConfig, MonteCarloConfig, MonteCarloResult, Opportunity, PriceBar,
};

struct SimOutcome {
    net_pnl: f64,
    win_rate: f64,
    sharpe: f64,
    max_drawdown: f64,
    trade_count: usize,
}

/// Run the Monte Carlo simulation.
///
/// Draws `bootstrap_window` dates with replacement from the unique dates in
/// the opportunity set (duplicate draws collapse when filtering), runs a
/// full backtest per sample, and reduces the surviving runs to a
/// distribution. Failed simulations are dropped with a warning; the whole
/// operation errors only when none succeed. A fixed `seed` makes the
/// sampling reproducible.
pub fn run_monte_carlo(
    config: &BacktestConfig,
    mc_config: &MonteCarloConfig,
    opportunities: &[Opportunity],
    prices: &[PriceBar],
) -> Result<MonteCarloResult, BacktestError> {
    config.validate()?;
    if mc_config.num_simulations == 0 || mc_config.bootstrap_window == 0 {
        return Err(BacktestError::InvalidConfig(
            "num_simulations and bootstrap_window must be positive".into(),
        ));
    }

    let unique_dates: Vec<NaiveDate> = opportunities
        .iter()
        .map(|o| o.date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if unique_dates.is_empty() {
        return Err(BacktestError::InsufficientData(
            "no opportunity dates to resample".into(),
        ));
    }

    let outcomes: Vec<SimOutcome> = (0..mc_config.num_simulations)
        .into_par_iter()
        .filter_map(|sim| {
            let mut rng = match mc_config.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(sim as u64)),
                None => StdRng::from_entropy(),
            };

            let mut sampled_dates: HashSet<NaiveDate> = HashSet::new();
            for _ in 0..mc_config.bootstrap_window {
                sampled_dates.insert(unique_dates[rng.gen_range(0..unique_dates.len())]);
            }

            let sample: Vec<Opportunity> = opportunities
                .iter()
                .filter(|o| sampled_dates.contains(&o.date))
                .cloned()
                .collect();

            match BacktestEngine::new(config.clone()).run(&sample, prices) {
                Ok(result) => Some(SimOutcome {
                    net_pnl: result.metrics.net_pnl.to_f64().unwrap_or(0.0),
                    win_rate: result.metrics.win_rate,
                    sharpe: result.metrics.sharpe_ratio,
                    max_drawdown: result.metrics.max_drawdown,
                    trade_count: result.metrics.total_trades,
                }),
                Err(err) => {
                    warn!(sim, error = %err, "simulation failed; dropping");
                    None
                }
            }
        })
        .collect();

    if outcomes.is_empty() {
        return Err(BacktestError::Simulation(
            "all Monte Carlo simulations failed".into(),
        ));
    }

    Ok(aggregate(&outcomes))
}

fn aggregate(outcomes: &[SimOutcome]) -> MonteCarloResult {
    let n = outcomes.len();
    let pnls: Vec<f64> = outcomes.iter().map(|o| o.net_pnl).collect();
    let win_rates: Vec<f64> = outcomes.iter().map(|o| o.win_rate).collect();

    let mut pnl_data = Data::new(pnls.clone());
    let mut win_rate_data = Data::new(win_rates.clone());

    let profitable = pnls.iter().filter(|p| **p > 0.0).count();
    let best_case_pnl = pnls.iter().cloned().fold(f64::MIN, f64::max);
    let worst_case_pnl = pnls.iter().cloned().fold(f64::MAX, f64::min);

    MonteCarloResult {
        simulations_run: n,
        mean_net_pnl: pnls.clone().mean(),
        std_net_pnl: std_dev_or_zero(&pnls),
        pnl_p5: pnl_data.percentile(5),
        pnl_p25: pnl_data.percentile(25),
        pnl_p50: pnl_data.percentile(50),
        pnl_p75: pnl_data.percentile(75),
        pnl_p95: pnl_data.percentile(95),
        mean_win_rate: win_rates.clone().mean(),
        std_win_rate: std_dev_or_zero(&win_rates),
        win_rate_p5: win_rate_data.percentile(5),
        win_rate_p95: win_rate_data.percentile(95),
        probability_of_profit: profitable as f64 / n as f64,
        expected_max_drawdown: outcomes.iter().map(|o| o.max_drawdown).sum::<f64>() / n as f64,
        mean_sharpe: outcomes.iter().map(|o| o.sharpe).sum::<f64>() / n as f64,
        mean_trade_count: outcomes.iter().map(|o| o.trade_count as f64).sum::<f64>() / n as f64,
        best_case_pnl,
        worst_case_pnl,
    }
}

/// Sample standard deviation; a single observation has none.
fn std_dev_or_zero(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.to_vec().std_dev()
}
