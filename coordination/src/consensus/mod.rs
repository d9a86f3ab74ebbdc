//! Multi-reviewer consensus scoring.

pub mod dedup;
pub mod engine;
pub mod history;
pub mod types;

pub use dedup::{deduplicate, similarity};
pub use engine::{aggregate, ConsensusEngine, ReviewRequest, ReviewerBackend};
pub use history::ConsensusHistory;
pub use types::{
    ConsensusResult, DivergentView, ExtendedAnalysis, Finding, Location, ReviewOutput,
    ReviewerError, ReviewerReport,
};
