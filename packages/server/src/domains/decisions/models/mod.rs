pub mod event;
pub mod latest;

pub use event::{ApplyOutcome, DecisionEvent};
pub use latest::DecisionLatest;
