//! Open-position lifecycle: stop-loss, breakeven lock, trailing profit,
//! smart exit and the moonshot cap.

pub mod machine;
pub mod manager;
pub mod state;

pub use machine::{step, LifecycleConfig};
pub use manager::{ExchangePosition, LifecycleManager};
pub use state::{CloseReason, CloseSignal, LifecycleState, OpenPosition, Tick};
