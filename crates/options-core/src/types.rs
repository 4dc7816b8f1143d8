//! Shared option-domain types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            OptionType::Call => "call",
            OptionType::Put => "put",
        }
    }

    /// Intrinsic value of the option at the given underlying price.
    pub fn intrinsic_value(self, spot: Decimal, strike: Decimal) -> Decimal {
        let raw = match self {
            OptionType::Call => spot - strike,
            OptionType::Put => strike - spot,
        };
        raw.max(Decimal::ZERO)
    }
}

/// Greeks captured at entry time. Produced by the external Black-Scholes
/// calculators; the backtest core only stores them on the trade record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GreeksSnapshot {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub implied_volatility: f64,
}
