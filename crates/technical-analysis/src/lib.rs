pub mod context;
pub mod indicators;
pub mod order_flow;

#[cfg(test)]
mod indicators_tests;

pub use context::*;
pub use indicators::*;
pub use order_flow::*;
