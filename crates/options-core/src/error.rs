use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Unsupported optimization metric: {0}")]
    UnsupportedMetric(String),

    #[error("Unknown optimization parameter: {0}")]
    UnknownParameter(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Simulation error: {0}")]
    Simulation(String),
}
