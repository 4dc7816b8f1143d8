//! Walk-forward parameter optimization: rolling (train, test) windows with
//! an exhaustive grid search in-sample and validation out-of-sample.

use std::collections::HashMap;

use chrono::Duration;
use options_core::BacktestError;
use rayon::prelude::*;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing::warn;

use crate::engine::BacktestEngine;
use crate::models::{
    BacktestConfig, Opportunity, ParamRanges, PerformanceMetrics, PriceBar, WalkForwardConfig,
    WalkForwardPeriod, WalkForwardResult,
};

#[derive(Clone, Copy)]
enum Polarity {
    Maximize,
    Minimize,
}

/// Recognized optimization metrics. `sharpe_ratio`, `profit_factor` and
/// `win_rate` maximize; the rest minimize. Anything else fails fast.
fn metric_polarity(name: &str) -> Result<Polarity, BacktestError> {
    match name {
        "sharpe_ratio" | "profit_factor" | "win_rate" => Ok(Polarity::Maximize),
        "max_drawdown" | "net_pnl" | "expectancy" | "annualized_return" | "calmar_ratio" => {
            Ok(Polarity::Minimize)
        }
        other => Err(BacktestError::UnsupportedMetric(other.to_string())),
    }
}

fn extract_metric(metrics: &PerformanceMetrics, name: &str) -> f64 {
    match name {
        "sharpe_ratio" => metrics.sharpe_ratio,
        "profit_factor" => metrics.profit_factor,
        "win_rate" => metrics.win_rate,
        "max_drawdown" => metrics.max_drawdown,
        "net_pnl" => metrics.net_pnl.to_f64().unwrap_or(0.0),
        "expectancy" => metrics.expectancy,
        "annualized_return" => metrics.annualized_return,
        "calmar_ratio" => metrics.calmar_ratio,
        _ => 0.0,
    }
}

/// Set one named configuration field to a candidate value. Unknown names
/// are a configuration error, caught before any simulation runs.
fn apply_param(config: &mut BacktestConfig, name: &str, value: f64) -> Result<(), BacktestError> {
    match name {
        "min_score_threshold" => config.min_score_threshold = value,
        "profit_target_pct" => config.profit_target_pct = value,
        "stop_loss_pct" => config.stop_loss_pct = value,
        "max_position_size" => config.max_position_size = value,
        "max_portfolio_heat" => config.max_portfolio_heat = value,
        "max_sector_concentration" => config.max_sector_concentration = value,
        "max_spread_pct" => config.max_spread_pct = value,
        "min_days_to_expiration" => config.min_days_to_expiration = value as i64,
        "max_days_to_expiration" => config.max_days_to_expiration = value as i64,
        "min_volume" => config.min_volume = value as i64,
        "min_open_interest" => config.min_open_interest = value as i64,
        "max_positions" => config.max_positions = value as usize,
        "max_positions_per_symbol" => config.max_positions_per_symbol = value as usize,
        other => return Err(BacktestError::UnknownParameter(other.to_string())),
    }
    Ok(())
}

/// Cartesian product of the supplied ranges, keys in sorted order so the
/// grid (and therefore tie-breaking) is deterministic. No supplied ranges
/// means a single base-config combination.
fn generate_grid(ranges: &ParamRanges) -> Vec<HashMap<String, f64>> {
    let mut keys: Vec<&String> = ranges.keys().collect();
    keys.sort();

    let mut grid: Vec<HashMap<String, f64>> = vec![HashMap::new()];
    for key in keys {
        let values = &ranges[key];
        if values.is_empty() {
            continue;
        }
        let mut next = Vec::with_capacity(grid.len() * values.len());
        for combo in &grid {
            for &value in values {
                let mut extended = combo.clone();
                extended.insert(key.clone(), value);
                next.push(extended);
            }
        }
        grid = next;
    }
    grid
}

struct Window {
    train_start: chrono::NaiveDate,
    train_end: chrono::NaiveDate,
    test_start: chrono::NaiveDate,
    test_end: chrono::NaiveDate,
}

fn split_windows(config: &BacktestConfig, wf: &WalkForwardConfig) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut t = config.start_date;
    loop {
        let train_start = t;
        let train_end = train_start + Duration::days(wf.optimization_window_days - 1);
        let test_start = train_end + Duration::days(1);
        let test_end = test_start + Duration::days(wf.out_of_sample_days - 1);
        if test_end > config.end_date {
            break;
        }
        windows.push(Window {
            train_start,
            train_end,
            test_start,
            test_end,
        });
        t += Duration::days(wf.out_of_sample_days);
    }
    windows
}

/// Run walk-forward optimization.
///
/// Per window: exhaustive grid search in-sample (parallel, but the best
/// pick is a first-seen index-ordered reduction so ties break
/// deterministically), then one out-of-sample run with the winning
/// parameters. Only out-of-sample performance is recorded. Parameter
/// combinations that fail are skipped; a window where everything fails is
/// dropped with a warning. The whole run errors only when no window
/// produced a result.
pub fn run_walk_forward(
    base_config: &BacktestConfig,
    wf_config: &WalkForwardConfig,
    param_ranges: &ParamRanges,
    opportunities: &[Opportunity],
    prices: &[PriceBar],
) -> Result<WalkForwardResult, BacktestError> {
    base_config.validate()?;
    let polarity = metric_polarity(&wf_config.metric)?;
    if wf_config.optimization_window_days <= 0 || wf_config.out_of_sample_days <= 0 {
        return Err(BacktestError::InvalidConfig(
            "walk-forward window lengths must be positive".into(),
        ));
    }
    // Reject unknown parameter names before doing any simulation work.
    let mut scratch = base_config.clone();
    for (name, values) in param_ranges {
        if values.is_empty() {
            continue;
        }
        apply_param(&mut scratch, name, values[0])?;
    }

    let windows = split_windows(base_config, wf_config);
    if windows.is_empty() {
        return Err(BacktestError::InsufficientData(format!(
            "date range {}..{} does not fit one {}+{} day walk-forward window",
            base_config.start_date,
            base_config.end_date,
            wf_config.optimization_window_days,
            wf_config.out_of_sample_days
        )));
    }

    let grid = generate_grid(param_ranges);
    let mut periods: Vec<WalkForwardPeriod> = Vec::new();

    for (i, window) in windows.iter().enumerate() {
        // Grid search on the training window, parallel over combinations.
        let scores: Vec<Option<f64>> = grid
            .par_iter()
            .map(|combo| {
                let mut config = base_config.clone();
                config.start_date = window.train_start;
                config.end_date = window.train_end;
                for (name, &value) in combo {
                    // Names were validated up front.
                    if apply_param(&mut config, name, value).is_err() {
                        return None;
                    }
                }
                if config.validate().is_err() {
                    return None;
                }
                match BacktestEngine::new(config).run(opportunities, prices) {
                    Ok(result) => Some(extract_metric(&result.metrics, &wf_config.metric)),
                    Err(err) => {
                        warn!(period = i + 1, error = %err, "parameter combination failed");
                        None
                    }
                }
            })
            .collect();

        // First candidate with the best score wins: strict comparison in
        // encounter order.
        let mut best: Option<(usize, f64)> = None;
        for (idx, score) in scores.iter().enumerate() {
            let Some(score) = *score else { continue };
            let better = match best {
                None => true,
                Some((_, current)) => match polarity {
                    Polarity::Maximize => score > current,
                    Polarity::Minimize => score < current,
                },
            };
            if better {
                best = Some((idx, score));
            }
        }
        let Some((best_idx, best_score)) = best else {
            warn!(period = i + 1, "all parameter combinations failed; skipping period");
            continue;
        };
        let best_params = grid[best_idx].clone();

        // Validate the winner out-of-sample; that result is the one that
        // counts for this period.
        let mut oos_config = base_config.clone();
        oos_config.start_date = window.test_start;
        oos_config.end_date = window.test_end;
        for (name, &value) in &best_params {
            apply_param(&mut oos_config, name, value)?;
        }
        let oos_result = match BacktestEngine::new(oos_config).run(opportunities, prices) {
            Ok(result) => result,
            Err(err) => {
                warn!(period = i + 1, error = %err, "out-of-sample run failed; skipping period");
                continue;
            }
        };

        periods.push(WalkForwardPeriod {
            period_number: i + 1,
            train_start: window.train_start,
            train_end: window.train_end,
            test_start: window.test_start,
            test_end: window.test_end,
            best_params,
            in_sample_score: best_score,
            out_of_sample: oos_result.metrics,
        });
    }

    if periods.is_empty() {
        return Err(BacktestError::Simulation(
            "every walk-forward period failed".into(),
        ));
    }

    Ok(aggregate(periods))
}

/// Straight sums for counts and P&L, trade-count-weighted averages for the
/// ratio metrics. Profit factor is recomputed from summed gross figures so
/// infinite per-period values cannot poison the average.
fn aggregate(periods: Vec<WalkForwardPeriod>) -> WalkForwardResult {
    let total_trades: usize = periods.iter().map(|p| p.out_of_sample.total_trades).sum();
    let total_net_pnl: Decimal = periods.iter().map(|p| p.out_of_sample.net_pnl).sum();

    let weighted = |f: fn(&PerformanceMetrics) -> f64| -> f64 {
        if total_trades == 0 {
            return 0.0;
        }
        periods
            .iter()
            .map(|p| f(&p.out_of_sample) * p.out_of_sample.total_trades as f64)
            .sum::<f64>()
            / total_trades as f64
    };

    let win_rate = weighted(|m| m.win_rate);
    let sharpe_ratio = weighted(|m| m.sharpe_ratio);

    let gross_profit: Decimal = periods.iter().map(|p| p.out_of_sample.gross_profit).sum();
    let gross_loss: Decimal = periods.iter().map(|p| p.out_of_sample.gross_loss).sum();
    let profit_factor = if gross_loss > Decimal::ZERO {
        gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0)
    } else if gross_profit > Decimal::ZERO {
        f64::INFINITY
    } else {
        0.0
    };

    WalkForwardResult {
        periods,
        total_trades,
        total_net_pnl,
        win_rate,
        sharpe_ratio,
        profit_factor,
    }
}
