//! Option price approximation for marking positions.
//!
//! True historical option chains are not available day by day, so the
//! current value of an open position is *approximated* as intrinsic value
//! plus the entry-time extrinsic value decayed by `sqrt(remaining/total)`
//! days to expiration. This is an approximation, not a Black-Scholes
//! pricer; the real Greeks and probability calculators live outside this
//! crate.

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::Trade;

/// Minimum quoted value of any option.
const PRICE_FLOOR: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Estimate the current option price for an open trade given the current
/// underlying close.
pub fn estimate_option_price(trade: &Trade, underlying: Decimal, date: NaiveDate) -> Decimal {
    let intrinsic_now = trade
        .option_type
        .intrinsic_value(underlying, trade.strike);

    let intrinsic_at_entry = trade
        .option_type
        .intrinsic_value(trade.entry_underlying, trade.strike);
    let original_time_value = (trade.entry_price - intrinsic_at_entry).max(Decimal::ZERO);

    let total_days = (trade.expiration - trade.entry_date).num_days();
    let remaining_days = (trade.expiration - date).num_days().max(0);

    let decay = if total_days > 0 {
        (remaining_days as f64 / total_days as f64).sqrt()
    } else {
        0.0
    };

    let time_value = original_time_value.to_f64().unwrap_or(0.0) * decay;
    let estimated =
        intrinsic_now + Decimal::from_f64(time_value).unwrap_or(Decimal::ZERO);

    estimated.max(PRICE_FLOOR).round_dp(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Opportunity;
    use options_core::{GreeksSnapshot, OptionType};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn call_trade(entry_price: f64, strike: f64, spot: f64) -> Trade {
        let opp = Opportunity {
            date: d("2024-01-02"),
            symbol: "AAPL".to_string(),
            option_type: OptionType::Call,
            strike: Decimal::from_f64(strike).unwrap(),
            expiration: d("2024-02-01"), // 30 days out
            bid: Decimal::from_f64(entry_price).unwrap(),
            ask: Decimal::from_f64(entry_price).unwrap(),
            stock_price: Decimal::from_f64(spot).unwrap(),
            score: 80.0,
            volume: 500,
            open_interest: 1000,
            implied_volatility: 0.30,
            days_to_expiration: 30,
            greeks: GreeksSnapshot::default(),
            sector: None,
        };
        Trade::open(&opp, 1, d("2024-01-02"))
    }

    #[test]
    fn otm_option_decays_toward_floor() {
        let trade = call_trade(2.0, 110.0, 100.0); // pure time value
        let at_expiry = estimate_option_price(
            &trade,
            Decimal::from_f64(100.0).unwrap(),
            d("2024-02-01"),
        );
        assert_eq!(at_expiry, Decimal::from_f64(0.01).unwrap());
    }

    #[test]
    fn sqrt_decay_halves_time_value_at_three_quarters_elapsed() {
        // remaining/total = 0.25 → sqrt = 0.5 → time value 2.0 → 1.0
        let trade = call_trade(2.0, 110.0, 100.0);
        let est = estimate_option_price(
            &trade,
            Decimal::from_f64(100.0).unwrap(),
            d("2024-01-24"), // 22 of 30 days elapsed → remaining ~ ok below
        );
        // 8 days remain of 30: sqrt(8/30) ≈ 0.5164 → est ≈ 1.0328
        let expected = 2.0 * (8.0_f64 / 30.0).sqrt();
        let got = est.to_f64().unwrap();
        assert!((got - expected).abs() < 1e-3, "got {got}, want {expected}");
    }

    #[test]
    fn intrinsic_value_survives_decay() {
        let trade = call_trade(6.0, 100.0, 105.0); // 5 intrinsic + 1 time value
        let est = estimate_option_price(
            &trade,
            Decimal::from_f64(112.0).unwrap(),
            d("2024-02-01"),
        );
        // At expiration time value is gone, intrinsic is 12.
        assert_eq!(est.to_f64().unwrap(), 12.0);
    }
}
