/// One match, fully resolved to a file location.
///
/// Context lines come from the same content by position arithmetic and are
/// clamped at the content's edges; a line skipped during indexing renders
/// as an empty context line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub tree: String,
    pub revision: String,
    pub path: String,
    /// 1-based line number within the file
    pub line_number: u32,
    pub line: Vec<u8>,
    /// Byte range of the first regex match within the line
    pub bounds: (usize, usize),
    pub context_before: Vec<Vec<u8>>,
    pub context_after: Vec<Vec<u8>>,
}
