//! Query compilation: parse, enforce cost caps, plan the candidate filter.

pub mod eval;
pub mod planner;
pub mod term;
pub mod width;

pub use eval::{candidates, CandidateStream};
pub use term::Term;

use std::fmt;
use std::sync::Arc;

/// Upper bound on the compiled size of a query regex, in bytes of compiled
/// program
pub const MAX_REGEX_SIZE: usize = 1 << 16;

/// Upper bound on the NFA width of a query regex
pub const MAX_REGEX_WIDTH: u32 = 200;

/// Errors reported back to the client at the query boundary. Messages are
/// client-safe: no server paths, no internal offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The pattern does not parse
    BadRegex(String),
    /// The compiled program exceeds [`MAX_REGEX_SIZE`]
    TooLarge,
    /// The pattern's NFA width exceeds [`MAX_REGEX_WIDTH`]
    TooWide,
    /// The query line itself is malformed
    BadQuery(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::BadRegex(msg) => write!(f, "regex parse error: {}", msg),
            QueryError::TooLarge => write!(f, "regex too large"),
            QueryError::TooWide => write!(f, "regex too complex"),
            QueryError::BadQuery(msg) => write!(f, "bad query: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

/// A query body ready to run: the verifier regex plus the candidate filter
#[derive(Clone)]
pub struct CompiledQuery {
    pub re: Arc<regex::bytes::Regex>,
    pub term: Term,
}

/// Parse and plan a query body. Both cost caps are enforced here, before
/// any permit is acquired: the width cap by walking the parsed form, the
/// program-size cap by the regex engine's own compile-time limit. The two
/// are deliberately independent; a pattern may pass one and fail the other.
pub fn compile(pattern: &str, fold_case: bool) -> Result<CompiledQuery, QueryError> {
    let ast = regex_syntax::ast::parse::Parser::new()
        .parse(pattern)
        .map_err(|e| QueryError::BadRegex(e.to_string()))?;
    if width::regex_width(&ast) > MAX_REGEX_WIDTH {
        return Err(QueryError::TooWide);
    }

    let hir = regex_syntax::ParserBuilder::new()
        .utf8(false)
        .case_insensitive(fold_case)
        .build()
        .parse(pattern)
        .map_err(|e| QueryError::BadRegex(e.to_string()))?;

    let re = regex::bytes::RegexBuilder::new(pattern)
        .case_insensitive(fold_case)
        .size_limit(MAX_REGEX_SIZE)
        .build()
        .map_err(|e| match e {
            regex::Error::CompiledTooBig(_) => QueryError::TooLarge,
            other => QueryError::BadRegex(other.to_string()),
        })?;

    let term = planner::plan_hir(&hir);
    Ok(CompiledQuery {
        re: Arc::new(re),
        term,
    })
}
