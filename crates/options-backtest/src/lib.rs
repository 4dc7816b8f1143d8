pub mod engine;
pub mod exits;
pub mod metrics;
pub mod models;
pub mod monte_carlo;
pub mod portfolio;
pub mod pricing;
pub mod walk_forward;

pub use engine::BacktestEngine;
pub use exits::ExitHook;
pub use models::*;
pub use monte_carlo::run_monte_carlo;
pub use walk_forward::run_walk_forward;
