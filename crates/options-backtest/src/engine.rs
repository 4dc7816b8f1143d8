use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use options_core::BacktestError;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::exits::{evaluate_exit, ExitHook};
use crate::metrics::compute_metrics;
use crate::models::*;
use crate::portfolio::PositionBook;
use crate::pricing::estimate_option_price;

/// Backtesting engine: replays a chronological stream of option
/// opportunities against historical underlying prices, one calendar day at
/// a time, under portfolio-level risk limits.
///
/// The single-run path is strictly sequential and deterministic for fixed
/// inputs; walk-forward and Monte Carlo wrap it as a black box.
pub struct BacktestEngine {
    config: BacktestConfig,
    exit_hook: Option<ExitHook>,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            exit_hook: None,
        }
    }

    /// Install an optional custom exit predicate, evaluated after the
    /// built-in exit rules.
    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.exit_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the backtest over `[start_date, end_date]`.
    ///
    /// Inputs must cover the configured range; rows outside it are ignored.
    /// Missing price data for a symbol on a given day skips that symbol for
    /// the day — an expected condition, never an error. A run that enters
    /// no trades returns all-zero metrics.
    pub fn run(
        &self,
        opportunities: &[Opportunity],
        prices: &[PriceBar],
    ) -> Result<BacktestResult, BacktestError> {
        self.config.validate()?;
        info!(
            start = %self.config.start_date,
            end = %self.config.end_date,
            "starting backtest run"
        );

        // Index prices per symbol for most-recent-at-or-before lookups.
        let mut price_index: HashMap<&str, BTreeMap<NaiveDate, Decimal>> = HashMap::new();
        for bar in prices {
            price_index
                .entry(bar.symbol.as_str())
                .or_default()
                .insert(bar.date, bar.close);
        }

        // Index opportunities by date, dropping rows outside the range.
        let mut opps_by_date: BTreeMap<NaiveDate, Vec<&Opportunity>> = BTreeMap::new();
        for opp in opportunities {
            if opp.date >= self.config.start_date && opp.date <= self.config.end_date {
                opps_by_date.entry(opp.date).or_default().push(opp);
            }
        }

        let mut cash = self.config.initial_capital;
        let mut book = PositionBook::new();
        let mut closed: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();

        // Walk through each calendar day chronologically.
        let mut date = self.config.start_date;
        loop {
            // 1. Process new entries, best score first. Equal scores break
            //    ties by symbol then strike so runs stay order-independent.
            if let Some(day_opps) = opps_by_date.get(&date) {
                let mut candidates: Vec<&Opportunity> = day_opps.clone();
                candidates.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.symbol.cmp(&b.symbol))
                        .then_with(|| a.strike.cmp(&b.strike))
                });

                for opp in candidates {
                    if book.open_count() >= self.config.max_positions {
                        break;
                    }
                    // Book capital: cash plus committed cost basis, i.e.
                    // initial capital adjusted for realized P&L.
                    let capital = cash + book.capital_at_risk();
                    if !book.can_enter(opp, &self.config, capital) {
                        continue;
                    }
                    let contracts = book.position_size(opp.mid_price(), &self.config, capital);
                    if contracts == 0 {
                        // Sized out by risk or heat limits; not an error.
                        continue;
                    }
                    let trade = Trade::open(opp, contracts, date);
                    debug!(id = %trade.id(), contracts, "entering position");
                    cash -= trade.cost_basis();
                    book.add(trade);
                }
            }

            // 2. Mark open positions to the pricing approximator, then
            // 3. evaluate exit conditions. Symbols with no usable price at
            //    or before today stay unresolved until data shows up.
            for trade in book.iter_open_mut() {
                let underlying = price_index
                    .get(trade.symbol.as_str())
                    .and_then(|by_date| by_date.range(..=date).next_back())
                    .map(|(_, close)| *close);
                let Some(underlying) = underlying else {
                    continue;
                };

                let estimated = estimate_option_price(trade, underlying, date);
                trade.mark(estimated, underlying);

                if let Some(reason) = evaluate_exit(
                    trade,
                    estimated,
                    underlying,
                    date,
                    &self.config,
                    self.exit_hook.as_ref(),
                ) {
                    trade.close(
                        date,
                        estimated,
                        Some(underlying),
                        reason,
                        self.config.commission_per_contract,
                    );
                }
            }

            for trade in book.sweep_closed() {
                debug!(id = %trade.id(), reason = ?trade.exit_reason, "closed position");
                // Exit proceeds net of commission: cost basis + net P&L.
                cash += trade.cost_basis() + trade.net_pnl;
                closed.push(trade);
            }

            // 4. Record equity: cash plus open positions at latest marks.
            equity_curve.push(EquityPoint {
                date,
                equity: cash + book.mark_value(),
            });

            if date >= self.config.end_date {
                break;
            }
            date = date
                .succ_opt()
                .ok_or_else(|| BacktestError::InvalidDateRange("date overflow".into()))?;
        }

        // Force-close whatever is still open at the last available price
        // (entry price when the underlying never resolved).
        for mut trade in book.drain_open() {
            let exit_price = trade.last_price.unwrap_or(trade.entry_price);
            trade.close(
                self.config.end_date,
                exit_price,
                trade.last_underlying,
                ExitReason::BacktestEnd,
                self.config.commission_per_contract,
            );
            debug!(id = %trade.id(), "force-closed at end of range");
            cash += trade.cost_basis() + trade.net_pnl;
            closed.push(trade);
        }
        if let Some(last) = equity_curve.last_mut() {
            last.equity = cash;
        }

        let metrics = compute_metrics(&closed, &equity_curve);
        info!(
            trades = metrics.total_trades,
            net_pnl = %metrics.net_pnl,
            "backtest run complete"
        );

        Ok(BacktestResult {
            metrics,
            trades: closed,
            equity_curve,
            final_capital: cash,
        })
    }
}
