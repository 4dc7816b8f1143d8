//! Position book: admission gating and sizing of new entries under
//! portfolio-level risk constraints.

use std::collections::HashSet;

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::{
    BacktestConfig, Opportunity, Trade, CONTRACT_MULTIPLIER, MAX_CONTRACTS_PER_POSITION,
};

/// Data-quality gate for a candidate opportunity.
pub fn passes_quality(opp: &Opportunity, config: &BacktestConfig) -> bool {
    opp.volume >= config.min_volume
        && opp.open_interest >= config.min_open_interest
        && opp.days_to_expiration >= config.min_days_to_expiration
        && opp.days_to_expiration <= config.max_days_to_expiration
        && opp.spread_pct() <= config.max_spread_pct
}

/// Open positions plus the identity set of every trade entered this
/// simulation. Mutated only by the engine's sequential day loop.
#[derive(Default)]
pub struct PositionBook {
    open: Vec<Trade>,
    entered_ids: HashSet<String>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_positions(&self) -> &[Trade] {
        &self.open
    }

    pub fn iter_open_mut(&mut self) -> impl Iterator<Item = &mut Trade> {
        self.open.iter_mut()
    }

    fn count_for_symbol(&self, symbol: &str) -> usize {
        self.open.iter().filter(|t| t.symbol == symbol).count()
    }

    /// Total cost basis currently committed ("heat" numerator).
    pub fn capital_at_risk(&self) -> Decimal {
        self.open.iter().map(|t| t.cost_basis()).sum()
    }

    fn sector_committed(&self, sector: &str) -> Decimal {
        self.open
            .iter()
            .filter(|t| t.sector.as_deref() == Some(sector))
            .map(|t| t.cost_basis())
            .sum()
    }

    /// Estimated value of all open positions at their latest marks.
    pub fn mark_value(&self) -> Decimal {
        self.open.iter().map(|t| t.mark_value()).sum()
    }

    /// Admission rule: every gate must pass. Sizing is separate; a sized-out
    /// opportunity is skipped silently, not an error.
    pub fn can_enter(
        &self,
        opp: &Opportunity,
        config: &BacktestConfig,
        capital: Decimal,
    ) -> bool {
        if opp.score < config.min_score_threshold {
            return false;
        }
        if !passes_quality(opp, config) {
            return false;
        }
        if self.open_count() >= config.max_positions {
            return false;
        }
        if self.count_for_symbol(&opp.symbol) >= config.max_positions_per_symbol {
            return false;
        }
        if let Some(sector) = opp.sector.as_deref() {
            let committed = self.sector_committed(sector).to_f64().unwrap_or(0.0);
            let capital_f64 = capital.to_f64().unwrap_or(0.0);
            if capital_f64 > 0.0 && committed / capital_f64 >= config.max_sector_concentration {
                return false;
            }
        }
        // Composite identity must be unique per simulation.
        !self
            .entered_ids
            .contains(&candidate_id(opp, opp.date))
    }

    /// Contracts for a new position: the lesser of the single-position risk
    /// cap, the remaining portfolio heat, and the absolute 10-contract cap.
    pub fn position_size(
        &self,
        mid_price: Decimal,
        config: &BacktestConfig,
        capital: Decimal,
    ) -> u32 {
        let cost_per_contract = mid_price * CONTRACT_MULTIPLIER;
        if cost_per_contract <= Decimal::ZERO {
            return 0;
        }

        let max_position = Decimal::from_f64(config.max_position_size).unwrap_or(Decimal::ZERO);
        let risk_limit = (capital * max_position / cost_per_contract)
            .floor()
            .to_u32()
            .unwrap_or(0);

        let heat = Decimal::from_f64(config.max_portfolio_heat).unwrap_or(Decimal::ZERO);
        let heat_budget = (capital * heat - self.capital_at_risk()).max(Decimal::ZERO);
        let heat_limit = (heat_budget / cost_per_contract)
            .floor()
            .to_u32()
            .unwrap_or(0);

        risk_limit.min(heat_limit).min(MAX_CONTRACTS_PER_POSITION)
    }

    pub fn add(&mut self, trade: Trade) {
        self.entered_ids.insert(trade.id());
        self.open.push(trade);
    }

    /// Remove trades a close event has finalized and hand them back.
    pub fn sweep_closed(&mut self) -> Vec<Trade> {
        let mut closed = Vec::new();
        let mut i = 0;
        while i < self.open.len() {
            if self.open[i].is_open() {
                i += 1;
            } else {
                closed.push(self.open.swap_remove(i));
            }
        }
        closed
    }

    /// Drain every remaining open position (end-of-range forced close).
    pub fn drain_open(&mut self) -> Vec<Trade> {
        std::mem::take(&mut self.open)
    }
}

fn candidate_id(opp: &Opportunity, entry_date: chrono::NaiveDate) -> String {
    format!(
        "{}-{}-{}-{}",
        opp.symbol,
        opp.strike,
        opp.option_type.as_str(),
        entry_date
    )
}
