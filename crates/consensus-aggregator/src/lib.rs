pub mod aggregate;
pub mod modifiers;

pub use aggregate::{aggregate, AggregationError};
pub use modifiers::{
    AppliedModifier, ConfidenceModifier, ModifierBounds, ModifierChain, OrderFlowModifier,
    TimeframeAlignmentModifier, WhaleModifier,
};
