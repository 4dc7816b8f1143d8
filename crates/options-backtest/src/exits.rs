//! Per-position exit evaluation, run each day for every open trade.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::{BacktestConfig, ExitReason, Trade};

/// Pluggable exit predicate: `(trade, current_price, current_underlying,
/// current_date)`. Returning `true` closes the trade with reason
/// `custom_exit`.
pub type ExitHook = Arc<dyn Fn(&Trade, Decimal, Decimal, NaiveDate) -> bool + Send + Sync>;

/// Evaluate exit conditions in fixed priority order: expiration, profit
/// target, stop loss, then the custom hook. `None` means the trade stays
/// open (its excursion tracking was already updated by the mark step).
pub fn evaluate_exit(
    trade: &Trade,
    current_price: Decimal,
    current_underlying: Decimal,
    date: NaiveDate,
    config: &BacktestConfig,
    hook: Option<&ExitHook>,
) -> Option<ExitReason> {
    if date >= trade.expiration {
        return Some(ExitReason::Expiration);
    }

    let entry = trade.entry_price.to_f64().unwrap_or(0.0);
    if entry > 0.0 {
        let ratio = (current_price - trade.entry_price).to_f64().unwrap_or(0.0) / entry;
        if ratio >= config.profit_target_pct {
            return Some(ExitReason::ProfitTarget);
        }
        if ratio <= config.stop_loss_pct {
            return Some(ExitReason::StopLoss);
        }
    }

    if let Some(hook) = hook {
        if hook(trade, current_price, current_underlying, date) {
            return Some(ExitReason::CustomExit);
        }
    }

    None
}
