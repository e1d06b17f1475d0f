use std::time::Duration;

/// Per-query counters, collected from query-local state only
#[derive(Debug, Default, Clone)]
pub struct MatchStats {
    /// Candidate lines the planner produced
    pub candidates: u64,
    /// Times the body regex ran
    pub regex_invocations: u64,
    /// Match records emitted (after file and tree filters)
    pub matches: u64,
    /// Line bytes handed to the regex
    pub bytes_scanned: u64,
    /// Wall-clock time for the whole query
    pub elapsed: Duration,
}
