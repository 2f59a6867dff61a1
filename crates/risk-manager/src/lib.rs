pub mod guardian;
pub mod margin;
pub mod models;

pub use guardian::RiskGuardian;
pub use margin::{least_profitable, MarginGuard};
pub use models::*;
