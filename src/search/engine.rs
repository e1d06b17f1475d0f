//! The match engine: verify candidates, enumerate files, emit records.
//!
//! Candidates arrive in ascending line-id order from the planner's stream.
//! Each candidate is verified by running the body regex over the line
//! bytes; on a match, every occurrence of the line in every file is
//! expanded to one record per `(tree, path, revision)` surviving the file
//! and tree filters. Emission happens inside the match loop through the
//! caller's sink, so a slow client backpressures the engine and a
//! disconnected one aborts the query with an error the caller observes.

use crate::index::types::{ContentId, LineId, SKIPPED_LINE};
use crate::index::Index;
use crate::plan::{candidates, CompiledQuery, Term};
use crate::search::record::MatchRecord;
use crate::search::stats::MatchStats;
use regex::Regex;
use std::io;

/// Everything one query needs at match time
pub struct SearchRequest<'a> {
    pub re: &'a regex::bytes::Regex,
    pub term: &'a Term,
    pub file_re: Option<&'a Regex>,
    pub tree_re: Option<&'a Regex>,
    pub context: usize,
}

impl<'a> SearchRequest<'a> {
    pub fn new(query: &'a CompiledQuery) -> Self {
        Self {
            re: &query.re,
            term: &query.term,
            file_re: None,
            tree_re: None,
            context: 0,
        }
    }

    pub fn file_filter(mut self, re: Option<&'a Regex>) -> Self {
        self.file_re = re;
        self
    }

    pub fn tree_filter(mut self, re: Option<&'a Regex>) -> Self {
        self.tree_re = re;
        self
    }

    pub fn context(mut self, lines: usize) -> Self {
        self.context = lines;
        self
    }
}

/// Sink receiving match records as they are produced
pub type MatchSink<'s> = dyn FnMut(&MatchRecord) -> io::Result<()> + 's;

pub struct Searcher<'a> {
    index: &'a Index,
}

impl<'a> Searcher<'a> {
    pub fn new(index: &'a Index) -> Self {
        Self { index }
    }

    /// Run one query to completion. Records reach the sink in candidate
    /// line-id order, records for one line in (tree, path) order; two runs
    /// of the same query produce identical streams.
    pub fn search(
        &self,
        req: &SearchRequest,
        sink: &mut MatchSink,
        stats: &mut MatchStats,
    ) -> io::Result<()> {
        let mut stream = candidates(self.index, req.term);
        while let Some(line) = stream.peek() {
            stats.candidates += 1;
            let bytes = self.index.line_bytes(line);
            stats.bytes_scanned += bytes.len() as u64;
            stats.regex_invocations += 1;
            if let Some(m) = req.re.find(bytes) {
                self.emit_line(req, line, (m.start(), m.end()), sink, stats)?;
            }
            stream.advance();
        }
        Ok(())
    }

    fn emit_line(
        &self,
        req: &SearchRequest,
        line: LineId,
        bounds: (usize, usize),
        sink: &mut MatchSink,
        stats: &mut MatchStats,
    ) -> io::Result<()> {
        let mut records: Vec<MatchRecord> = Vec::new();

        for &(content, idx) in self.index.occurrences(line) {
            for &file_id in self.index.files_of_content(content) {
                let file = self.index.file(file_id);
                let tree = self.index.tree_name(file.tree);
                if let Some(tree_re) = req.tree_re {
                    if !tree_re.is_match(tree) {
                        continue;
                    }
                }
                if let Some(file_re) = req.file_re {
                    if !file_re.is_match(&file.path) {
                        continue;
                    }
                }
                let (before, after) = self.context_of(content, idx as usize, req.context);
                for &rev in &file.revs {
                    records.push(MatchRecord {
                        tree: tree.to_string(),
                        revision: self.index.rev_label(rev).to_string(),
                        path: file.path.clone(),
                        line_number: idx + 1,
                        line: self.index.line_bytes(line).to_vec(),
                        bounds,
                        context_before: before.clone(),
                        context_after: after.clone(),
                    });
                }
            }
        }

        // Occurrence order already has ascending positions; a stable sort
        // by (tree, path) keeps them ascending within each file and leaves
        // revision order untouched.
        records.sort_by(|a, b| a.tree.cmp(&b.tree).then_with(|| a.path.cmp(&b.path)));

        for record in &records {
            stats.matches += 1;
            sink(record)?;
        }
        Ok(())
    }

    fn context_of(
        &self,
        content: ContentId,
        idx: usize,
        radius: usize,
    ) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        let lines = self.index.content_lines(content);
        let start = idx.saturating_sub(radius);
        let end = (idx + 1 + radius).min(lines.len());

        let render = |id: LineId| -> Vec<u8> {
            if id == SKIPPED_LINE {
                Vec::new()
            } else {
                self.index.line_bytes(id).to_vec()
            }
        };

        let before = lines[start..idx].iter().copied().map(render).collect();
        let after = lines[idx + 1..end].iter().copied().map(render).collect();
        (before, after)
    }
}
