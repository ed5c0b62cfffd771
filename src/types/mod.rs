pub mod backtest;
pub mod indicator;
pub mod market;
pub mod strategy;

pub use backtest::*;
pub use indicator::*;
pub use market::*;
pub use strategy::*;
