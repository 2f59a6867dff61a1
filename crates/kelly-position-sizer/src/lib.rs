//! Position sizing from a blended win-rate estimate, fractional Kelly and a
//! volatility adjustment.

pub mod kelly;
pub mod sizer;
pub mod win_rate;

pub use kelly::{kelly_fraction, KellyConfig};
pub use sizer::{round_to_lot, PositionSizer, SizerConfig, SizingAbort, SizingRequest};
pub use win_rate::{WinRateEstimate, WinRateEstimator};
