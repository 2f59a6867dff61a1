pub mod ledger;
pub mod memory;
pub mod recorder;
pub mod status;

pub use ledger::{
    decision_hash, trade_hash, HttpLedger, Ledger, LedgerError, LedgerResult, LedgerStats, LogLedger, Receipt,
    TradeProof,
};
pub use memory::{MemoryStats, TradeMemoryStore};
pub use recorder::{Recorder, Submitted};
pub use status::{ActivityEntry, PositionSummary, SignalSummary, StatusSnapshot, StatusWriter};
