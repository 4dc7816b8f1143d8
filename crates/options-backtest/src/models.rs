use std::collections::HashMap;

use chrono::NaiveDate;
use options_core::{BacktestError, GreeksSnapshot, OptionType};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shares controlled by one option contract.
pub const CONTRACT_MULTIPLIER: Decimal = Decimal::ONE_HUNDRED;

/// Hard cap on contracts per position regardless of capital.
pub const MAX_CONTRACTS_PER_POSITION: u32 = 10;

/// A candidate option contract with a precomputed composite score, awaiting
/// a trading decision. Scoring itself happens upstream; the backtest only
/// consumes the number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub date: NaiveDate,
    pub symbol: String,
    #[serde(rename = "type")]
    pub option_type: OptionType,
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub bid: Decimal,
    pub ask: Decimal,
    #[serde(rename = "stockPrice")]
    pub stock_price: Decimal,
    pub score: f64,
    pub volume: i64,
    #[serde(rename = "openInterest")]
    pub open_interest: i64,
    #[serde(default)]
    pub implied_volatility: f64,
    pub days_to_expiration: i64,
    /// Entry Greeks snapshot from the external calculators.
    #[serde(default)]
    pub greeks: GreeksSnapshot,
    #[serde(default)]
    pub sector: Option<String>,
}

impl Opportunity {
    /// Mid of bid/ask, the fill-price proxy for entries.
    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Relative bid/ask spread. Degenerate quotes (mid <= 0) report an
    /// infinite spread so the quality gate rejects them.
    pub fn spread_pct(&self) -> f64 {
        let mid = self.mid_price().to_f64().unwrap_or(0.0);
        if mid <= 0.0 {
            return f64::INFINITY;
        }
        let spread = (self.ask - self.bid).to_f64().unwrap_or(0.0);
        spread / mid
    }
}

/// One (symbol, date, close) row used to mark underlyings to market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: Decimal,
}

/// Terminal disposition of a trade. A trade is `Open` until exactly one
/// close event moves it to one of the other states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    ClosedProfit,
    ClosedLoss,
    ExpiredItm,
    ExpiredOtm,
    StoppedOut,
}

/// Why a trade closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Expiration,
    ProfitTarget,
    StopLoss,
    CustomExit,
    BacktestEnd,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Expiration => "expiration",
            ExitReason::ProfitTarget => "profit_target",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::CustomExit => "custom_exit",
            ExitReason::BacktestEnd => "backtest_end",
        }
    }
}

/// One option position's lifecycle from entry to close.
///
/// Entry fields are set once at open; exit fields are written exactly once
/// by [`Trade::close`]. While open, only the mark/excursion fields change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    // Entry (immutable once set)
    pub symbol: String,
    pub option_type: OptionType,
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub entry_date: NaiveDate,
    pub entry_price: Decimal,
    pub entry_underlying: Decimal,
    pub contracts: u32,
    pub entry_score: f64,
    pub entry_greeks: GreeksSnapshot,
    pub sector: Option<String>,

    // Lifecycle
    pub status: TradeStatus,
    pub exit_date: Option<NaiveDate>,
    pub exit_price: Option<Decimal>,
    pub exit_underlying: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub gross_pnl: Decimal,
    pub commission: Decimal,
    pub net_pnl: Decimal,
    pub return_pct: f64,
    pub annualized_return: f64,
    pub days_held: i64,

    // Mark-to-market state (updated daily while open)
    pub last_price: Option<Decimal>,
    pub last_underlying: Option<Decimal>,
    /// Best unrealized P&L seen while open (dollars).
    pub max_favorable_excursion: Decimal,
    /// Worst unrealized P&L seen while open (dollars).
    pub max_adverse_excursion: Decimal,
}

impl Trade {
    /// Open a new position from an approved opportunity.
    pub fn open(opp: &Opportunity, contracts: u32, entry_date: NaiveDate) -> Self {
        Self {
            symbol: opp.symbol.clone(),
            option_type: opp.option_type,
            strike: opp.strike,
            expiration: opp.expiration,
            entry_date,
            entry_price: opp.mid_price(),
            entry_underlying: opp.stock_price,
            contracts,
            entry_score: opp.score,
            entry_greeks: opp.greeks,
            sector: opp.sector.clone(),
            status: TradeStatus::Open,
            exit_date: None,
            exit_price: None,
            exit_underlying: None,
            exit_reason: None,
            gross_pnl: Decimal::ZERO,
            commission: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            return_pct: 0.0,
            annualized_return: 0.0,
            days_held: 0,
            last_price: None,
            last_underlying: None,
            max_favorable_excursion: Decimal::ZERO,
            max_adverse_excursion: Decimal::ZERO,
        }
    }

    /// Composite identity: symbol + strike + type + entry date. Unique per
    /// simulation.
    pub fn id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.symbol,
            self.strike,
            self.option_type.as_str(),
            self.entry_date
        )
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Capital committed at entry: mid price per share, 100 shares per
    /// contract.
    pub fn cost_basis(&self) -> Decimal {
        self.entry_price * CONTRACT_MULTIPLIER * Decimal::from(self.contracts)
    }

    /// Current estimated value of the whole position.
    pub fn mark_value(&self) -> Decimal {
        self.last_price.unwrap_or(self.entry_price)
            * CONTRACT_MULTIPLIER
            * Decimal::from(self.contracts)
    }

    /// Record a daily mark and update MFE/MAE.
    pub fn mark(&mut self, estimated_price: Decimal, underlying: Decimal) {
        self.last_price = Some(estimated_price);
        self.last_underlying = Some(underlying);
        let unrealized = (estimated_price - self.entry_price)
            * CONTRACT_MULTIPLIER
            * Decimal::from(self.contracts);
        if unrealized > self.max_favorable_excursion {
            self.max_favorable_excursion = unrealized;
        }
        if unrealized < self.max_adverse_excursion {
            self.max_adverse_excursion = unrealized;
        }
    }

    /// Close the trade. Append-only: a second call on a closed trade is a
    /// no-op, preserving the single-transition invariant.
    pub fn close(
        &mut self,
        exit_date: NaiveDate,
        exit_price: Decimal,
        exit_underlying: Option<Decimal>,
        reason: ExitReason,
        commission_per_contract: Decimal,
    ) {
        if !self.is_open() {
            return;
        }

        let contracts = Decimal::from(self.contracts);
        self.exit_date = Some(exit_date);
        self.exit_price = Some(exit_price);
        self.exit_underlying = exit_underlying;
        self.exit_reason = Some(reason);

        self.gross_pnl = (exit_price - self.entry_price) * contracts * CONTRACT_MULTIPLIER;
        // Entry + exit legs.
        self.commission = commission_per_contract * contracts * Decimal::TWO;
        self.net_pnl = self.gross_pnl - self.commission;

        let cost_basis = self.cost_basis().to_f64().unwrap_or(0.0);
        self.return_pct = if cost_basis > 0.0 {
            self.net_pnl.to_f64().unwrap_or(0.0) / cost_basis
        } else {
            0.0
        };

        self.days_held = (exit_date - self.entry_date).num_days();
        // Same-day round trips annualize as one day held.
        self.annualized_return = self.return_pct * (365.0 / self.days_held.max(1) as f64);

        self.status = match reason {
            ExitReason::StopLoss => TradeStatus::StoppedOut,
            ExitReason::Expiration => {
                let spot = exit_underlying.unwrap_or(self.entry_underlying);
                if self.option_type.intrinsic_value(spot, self.strike) > Decimal::ZERO {
                    TradeStatus::ExpiredItm
                } else {
                    TradeStatus::ExpiredOtm
                }
            }
            _ => {
                if self.net_pnl > Decimal::ZERO {
                    TradeStatus::ClosedProfit
                } else {
                    TradeStatus::ClosedLoss
                }
            }
        };
    }
}

/// Frozen simulation parameters. Validated once up front; walk-forward
/// variants are derived copies, never in-place mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    /// Fraction of capital at risk simultaneously across open positions.
    pub max_portfolio_heat: f64,
    /// Fraction of capital a single position may consume.
    pub max_position_size: f64,
    pub commission_per_contract: Decimal,
    pub min_score_threshold: f64,
    pub min_days_to_expiration: i64,
    pub max_days_to_expiration: i64,
    /// e.g. 0.50 = close at +50%.
    pub profit_target_pct: f64,
    /// Negative, e.g. -0.50 = close at -50%.
    pub stop_loss_pct: f64,
    pub min_volume: i64,
    pub min_open_interest: i64,
    pub max_spread_pct: f64,
    pub max_positions: usize,
    pub max_positions_per_symbol: usize,
    pub max_sector_concentration: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            initial_capital: Decimal::new(100_000, 0),
            max_portfolio_heat: 0.10,
            max_position_size: 0.05,
            commission_per_contract: Decimal::new(65, 2),
            min_score_threshold: 70.0,
            min_days_to_expiration: 7,
            max_days_to_expiration: 45,
            profit_target_pct: 0.50,
            stop_loss_pct: -0.50,
            min_volume: 100,
            min_open_interest: 50,
            max_spread_pct: 0.15,
            max_positions: 10,
            max_positions_per_symbol: 2,
            max_sector_concentration: 0.30,
        }
    }
}

impl BacktestConfig {
    /// Fail-fast construction check. Rejects invalid combinations before
    /// any simulation work begins.
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.start_date > self.end_date {
            return Err(BacktestError::InvalidDateRange(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            )));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(BacktestError::InvalidConfig(
                "initial_capital must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_position_size) || self.max_position_size == 0.0 {
            return Err(BacktestError::InvalidConfig(
                "max_position_size must be in (0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_portfolio_heat) || self.max_portfolio_heat == 0.0 {
            return Err(BacktestError::InvalidConfig(
                "max_portfolio_heat must be in (0, 1]".into(),
            ));
        }
        if self.max_sector_concentration <= 0.0 || self.max_sector_concentration > 1.0 {
            return Err(BacktestError::InvalidConfig(
                "max_sector_concentration must be in (0, 1]".into(),
            ));
        }
        if self.profit_target_pct <= 0.0 {
            return Err(BacktestError::InvalidConfig(
                "profit_target_pct must be positive".into(),
            ));
        }
        if self.stop_loss_pct >= 0.0 {
            return Err(BacktestError::InvalidConfig(
                "stop_loss_pct must be negative".into(),
            ));
        }
        if self.min_days_to_expiration > self.max_days_to_expiration {
            return Err(BacktestError::InvalidConfig(
                "min_days_to_expiration exceeds max_days_to_expiration".into(),
            ));
        }
        if self.max_positions == 0 || self.max_positions_per_symbol == 0 {
            return Err(BacktestError::InvalidConfig(
                "position limits must be at least 1".into(),
            ));
        }
        if self.commission_per_contract < Decimal::ZERO {
            return Err(BacktestError::InvalidConfig(
                "commission_per_contract must not be negative".into(),
            ));
        }
        if self.max_spread_pct <= 0.0 {
            return Err(BacktestError::InvalidConfig(
                "max_spread_pct must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A point on the equity curve: one entry per simulated calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Decimal,
}

/// Risk/return metrics reduced from the closed-trade ledger and equity
/// curve. A run with no trades yields the all-zero default rather than an
/// error. Ratios are fractions (0.55 = 55%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub net_pnl: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    /// `+inf` when there are winners and no losers.
    pub profit_factor: f64,
    /// Net P&L per closed trade.
    pub expectancy: f64,
    pub sharpe_ratio: f64,
    /// Depth, as a fraction of the running peak.
    pub max_drawdown: f64,
    /// Longest run of equity-curve steps below the prior peak.
    pub max_drawdown_duration: usize,
    pub annualized_return: f64,
    pub calmar_ratio: f64,
    pub avg_days_held: f64,
}

/// Result of a completed backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub metrics: PerformanceMetrics,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_capital: Decimal,
}

// --- Walk-Forward Optimization ---

/// Candidate values per configuration field, consumed by the grid search.
pub type ParamRanges = HashMap<String, Vec<f64>>;

/// Rolling-window setup for walk-forward optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub optimization_window_days: i64,
    pub out_of_sample_days: i64,
    /// Metric optimized in-sample, e.g. "sharpe_ratio".
    pub metric: String,
}

/// One (train, test) period with its winning parameters and the
/// out-of-sample performance those parameters achieved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardPeriod {
    pub period_number: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub best_params: HashMap<String, f64>,
    /// Best in-sample score during optimization (reporting only; the
    /// representative result is the out-of-sample one).
    pub in_sample_score: f64,
    pub out_of_sample: PerformanceMetrics,
}

/// Aggregate across all out-of-sample periods: straight sums for counts and
/// P&L, trade-count-weighted averages for ratios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub periods: Vec<WalkForwardPeriod>,
    pub total_trades: usize,
    pub total_net_pnl: Decimal,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
}

// --- Monte Carlo Simulation ---

/// Bootstrap resampling setup. A fixed `seed` makes the run reproducible;
/// `None` draws from entropy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    pub num_simulations: usize,
    /// Calendar dates drawn (with replacement) per simulation.
    pub bootstrap_window: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Distribution of outcomes across the simulations that succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloResult {
    /// Simulations that produced a result (failures are dropped).
    pub simulations_run: usize,
    pub mean_net_pnl: f64,
    pub std_net_pnl: f64,
    pub pnl_p5: f64,
    pub pnl_p25: f64,
    pub pnl_p50: f64,
    pub pnl_p75: f64,
    pub pnl_p95: f64,
    pub mean_win_rate: f64,
    pub std_win_rate: f64,
    pub win_rate_p5: f64,
    pub win_rate_p95: f64,
    /// Empirical P(net_pnl > 0).
    pub probability_of_profit: f64,
    /// Mean max drawdown across runs.
    pub expected_max_drawdown: f64,
    pub mean_sharpe: f64,
    pub mean_trade_count: f64,
    pub best_case_pnl: f64,
    pub worst_case_pnl: f64,
}
