//! Reduction of the closed-trade ledger and equity curve into standard
//! risk/return metrics. Pure; computed once at the end of a run.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::{EquityPoint, PerformanceMetrics, Trade};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Compute metrics for a completed run. No closed trades yields the
/// all-zero default so batch analyses never need per-run error handling.
pub fn compute_metrics(trades: &[Trade], equity_curve: &[EquityPoint]) -> PerformanceMetrics {
    if trades.is_empty() {
        return PerformanceMetrics::default();
    }

    let total_trades = trades.len();
    let winning: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl > Decimal::ZERO).collect();
    let losing: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl <= Decimal::ZERO).collect();

    let gross_profit: Decimal = winning.iter().map(|t| t.net_pnl).sum();
    let gross_loss: Decimal = losing.iter().map(|t| t.net_pnl.abs()).sum();
    let net_pnl: Decimal = trades.iter().map(|t| t.net_pnl).sum();

    let win_rate = winning.len() as f64 / total_trades as f64;

    // Guarded divide: all winners and no losers is +inf, not a crash.
    let profit_factor = if gross_loss > Decimal::ZERO {
        gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0)
    } else if gross_profit > Decimal::ZERO {
        f64::INFINITY
    } else {
        0.0
    };

    let expectancy = net_pnl.to_f64().unwrap_or(0.0) / total_trades as f64;

    let largest_win = winning
        .iter()
        .map(|t| t.net_pnl)
        .max()
        .unwrap_or(Decimal::ZERO);
    let largest_loss = losing
        .iter()
        .map(|t| t.net_pnl)
        .min()
        .unwrap_or(Decimal::ZERO);
    let average_win = if winning.is_empty() {
        Decimal::ZERO
    } else {
        gross_profit / Decimal::from(winning.len())
    };
    let average_loss = if losing.is_empty() {
        Decimal::ZERO
    } else {
        -gross_loss / Decimal::from(losing.len())
    };

    let avg_days_held =
        trades.iter().map(|t| t.days_held).sum::<i64>() as f64 / total_trades as f64;

    let sharpe_ratio = sharpe(equity_curve);
    let (max_drawdown, max_drawdown_duration) = drawdown(equity_curve);
    let annualized_return = annualized(equity_curve);
    let calmar_ratio = if max_drawdown > 0.0 {
        annualized_return / max_drawdown
    } else {
        0.0
    };

    PerformanceMetrics {
        total_trades,
        winning_trades: winning.len(),
        losing_trades: losing.len(),
        win_rate,
        gross_profit,
        gross_loss,
        net_pnl,
        largest_win,
        largest_loss,
        average_win,
        average_loss,
        profit_factor,
        expectancy,
        sharpe_ratio,
        max_drawdown,
        max_drawdown_duration,
        annualized_return,
        calmar_ratio,
        avg_days_held,
    }
}

/// Annualized Sharpe from daily equity returns. Zero when the return
/// series is too short or has no variance.
fn sharpe(equity_curve: &[EquityPoint]) -> f64 {
    let returns = daily_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.clone().mean();
    let std_dev = returns.std_dev();
    if std_dev > 0.0 {
        (mean / std_dev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

fn daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].equity.to_f64().unwrap_or(0.0);
            let curr = w[1].equity.to_f64().unwrap_or(0.0);
            if prev > 0.0 {
                Some(curr / prev - 1.0)
            } else {
                None
            }
        })
        .collect()
}

/// Max drawdown depth (fraction of the running peak) and duration (longest
/// run of consecutive equity-curve steps below the prior peak).
fn drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    let mut peak = f64::MIN;
    let mut max_depth = 0.0_f64;
    let mut current_run = 0usize;
    let mut max_run = 0usize;

    for point in equity_curve {
        let equity = point.equity.to_f64().unwrap_or(0.0);
        if equity >= peak {
            peak = equity;
            current_run = 0;
            continue;
        }
        current_run += 1;
        max_run = max_run.max(current_run);
        if peak > 0.0 {
            let depth = (peak - equity) / peak;
            max_depth = max_depth.max(depth);
        }
    }

    (max_depth, max_run)
}

fn annualized(equity_curve: &[EquityPoint]) -> f64 {
    let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    let initial = first.equity.to_f64().unwrap_or(0.0);
    let final_equity = last.equity.to_f64().unwrap_or(0.0);
    if initial <= 0.0 || final_equity <= 0.0 {
        return 0.0;
    }
    let span_days = (last.date - first.date).num_days().max(1) as f64;
    (final_equity / initial).powf(365.0 / span_days) - 1.0
}
