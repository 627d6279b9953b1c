pub mod engine;
pub mod ledger;
pub mod lifecycle;
pub mod selector;
pub mod sweeper;

pub use engine::{DispatchEngine, DispatchOutcome};
pub use ledger::ReservationLedger;
pub use lifecycle::RideLifecycle;
pub use selector::{CandidateSelector, RankedCandidate};
pub use sweeper::{ExpirySweeper, SweepReport};
