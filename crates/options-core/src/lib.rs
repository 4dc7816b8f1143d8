pub mod error;
pub mod types;

pub use error::BacktestError;
pub use types::{GreeksSnapshot, OptionType};
