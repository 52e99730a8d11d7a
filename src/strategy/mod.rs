//! Trading strategy implementation.
//!
//! Derives mean-reversion signals from the spot/futures premium:
//! - Inner join of spot and futures closes
//! - Rolling z-score of the premium percentage
//! - Run de-duplication and low-volatility filtering

mod premium;

pub use premium::{write_diagnostics, PremiumPoint, PremiumSignalGenerator, StrategyConfig};
