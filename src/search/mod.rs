//! Candidate verification and match emission.

pub mod engine;
pub mod record;
pub mod stats;

pub use engine::{SearchRequest, Searcher};
pub use record::MatchRecord;
pub use stats::MatchStats;
