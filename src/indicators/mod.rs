// Technical indicators module
// Pure functions over OHLCV windows, plus the per-asset snapshot built from them

pub mod atr;
pub mod moving_average;
pub mod oscillators;
pub mod rsi;
pub mod snapshot;
pub mod volume;

pub use atr::{calculate_atr, calculate_natr, calculate_true_range};
pub use moving_average::{calculate_apo, calculate_ema, calculate_ppo, calculate_sma, calculate_wma};
pub use oscillators::{calculate_bop, calculate_cci, calculate_mom, calculate_roc, calculate_willr};
pub use rsi::calculate_rsi;
pub use snapshot::{format_decimal, format_optional, IndicatorSnapshot, SnapshotField};
pub use volume::{calculate_ad, calculate_mfi, calculate_obv};
