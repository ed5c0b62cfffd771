//! Market Signals - candle building, technical indicators, strategy
//! monitoring and backtesting for binary-outcome markets.

pub mod config;
pub mod error;
pub mod services;
pub mod types;

pub use config::Config;
pub use error::{EngineError, Result};
