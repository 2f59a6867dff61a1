pub mod advisor;
pub mod controller;
pub mod regime;

pub use advisor::{advisory_from_value, Advisory, LlmMacroAdvisor, MacroAdvisor};
pub use controller::{apply, DecisionSource, RegimeConfig, RegimeController, RegimeDecision, RegimeInput};
pub use regime::{classify, metrics, MarketRegime, RegimeMetrics, RegimeThresholds};
