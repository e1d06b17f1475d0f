//! Streaming evaluation of a [`Term`] against the posting index.
//!
//! Every node is a sorted stream of candidate line ids supporting
//! `peek`/`advance`/`seek`. AND is a leapfrog intersection that
//! short-circuits as soon as any branch exhausts; OR is a k-way minimum
//! merge; `Any` scans the whole line range.

use crate::index::postings::PostingCursor;
use crate::index::types::LineId;
use crate::index::Index;
use crate::plan::term::Term;

pub trait CandidateStream {
    /// The current candidate, or `None` when exhausted
    fn peek(&self) -> Option<LineId>;
    /// Move past the current candidate
    fn advance(&mut self);
    /// Move forward until the current candidate is >= target
    fn seek(&mut self, target: LineId);
}

/// Compile a term into its candidate stream over `index`
pub fn candidates<'a>(index: &'a Index, term: &Term) -> Box<dyn CandidateStream + 'a> {
    match term {
        Term::Trigram(t) => Box::new(index.postings().unigram(*t)),
        Term::Bigram(b) => Box::new(index.postings().bigram(*b)),
        Term::Any => Box::new(AllLines {
            next: 0,
            end: index.line_count(),
        }),
        Term::And(parts) => Box::new(Intersection::new(
            parts.iter().map(|p| candidates(index, p)).collect(),
        )),
        Term::Or(parts) => Box::new(Union::new(
            parts.iter().map(|p| candidates(index, p)).collect(),
        )),
    }
}

impl CandidateStream for PostingCursor<'_> {
    fn peek(&self) -> Option<LineId> {
        PostingCursor::peek(self)
    }

    fn advance(&mut self) {
        PostingCursor::advance(self)
    }

    fn seek(&mut self, target: LineId) {
        PostingCursor::seek(self, target)
    }
}

/// Full scan over `[0, end)`; the fallback when the planner cannot prune
struct AllLines {
    next: LineId,
    end: LineId,
}

impl CandidateStream for AllLines {
    fn peek(&self) -> Option<LineId> {
        (self.next < self.end).then_some(self.next)
    }

    fn advance(&mut self) {
        self.next += 1;
    }

    fn seek(&mut self, target: LineId) {
        self.next = self.next.max(target);
    }
}

/// Leapfrog k-way intersection
struct Intersection<'a> {
    streams: Vec<Box<dyn CandidateStream + 'a>>,
    cur: Option<LineId>,
}

impl<'a> Intersection<'a> {
    fn new(streams: Vec<Box<dyn CandidateStream + 'a>>) -> Self {
        let mut s = Self { streams, cur: None };
        s.align();
        s
    }

    fn align(&mut self) {
        if self.streams.is_empty() {
            self.cur = None;
            return;
        }
        loop {
            let mut max: LineId = 0;
            for s in &self.streams {
                match s.peek() {
                    None => {
                        self.cur = None;
                        return;
                    }
                    Some(v) => max = max.max(v),
                }
            }
            let mut aligned = true;
            for s in &mut self.streams {
                s.seek(max);
                match s.peek() {
                    None => {
                        self.cur = None;
                        return;
                    }
                    Some(v) if v != max => aligned = false,
                    Some(_) => {}
                }
            }
            if aligned {
                self.cur = Some(max);
                return;
            }
        }
    }
}

impl CandidateStream for Intersection<'_> {
    fn peek(&self) -> Option<LineId> {
        self.cur
    }

    fn advance(&mut self) {
        if let Some(v) = self.cur {
            for s in &mut self.streams {
                s.seek(v + 1);
            }
            self.align();
        }
    }

    fn seek(&mut self, target: LineId) {
        if matches!(self.cur, Some(v) if v >= target) {
            return;
        }
        for s in &mut self.streams {
            s.seek(target);
        }
        self.align();
    }
}

/// K-way minimum merge
struct Union<'a> {
    streams: Vec<Box<dyn CandidateStream + 'a>>,
}

impl<'a> Union<'a> {
    fn new(streams: Vec<Box<dyn CandidateStream + 'a>>) -> Self {
        Self { streams }
    }
}

impl CandidateStream for Union<'_> {
    fn peek(&self) -> Option<LineId> {
        self.streams.iter().filter_map(|s| s.peek()).min()
    }

    fn advance(&mut self) {
        if let Some(min) = self.peek() {
            for s in &mut self.streams {
                if s.peek() == Some(min) {
                    s.advance();
                }
            }
        }
    }

    fn seek(&mut self, target: LineId) {
        for s in &mut self.streams {
            s.seek(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusStore;

    fn collect(mut stream: Box<dyn CandidateStream + '_>) -> Vec<LineId> {
        let mut out = Vec::new();
        while let Some(v) = stream.peek() {
            out.push(v);
            stream.advance();
        }
        out
    }

    fn index_of(lines: &[&str]) -> Index {
        let mut store = CorpusStore::new();
        let body = lines.join("\n") + "\n";
        store.add_file("t", "HEAD", "f.txt", body.as_bytes()).unwrap();
        store.finalize().unwrap()
    }

    #[test]
    fn test_any_scans_all() {
        let index = index_of(&["aaa", "bbb", "ccc"]);
        assert_eq!(collect(candidates(&index, &Term::Any)), vec![0, 1, 2]);
    }

    #[test]
    fn test_and_intersects() {
        let index = index_of(&["abc def", "abc", "def", "abc def again"]);
        let term = Term::and(vec![
            Term::Trigram(crate::index::types::bytes_to_trigram(b'a', b'b', b'c')),
            Term::Trigram(crate::index::types::bytes_to_trigram(b'd', b'e', b'f')),
        ]);
        assert_eq!(collect(candidates(&index, &term)), vec![0, 3]);
    }

    #[test]
    fn test_or_merges_sorted() {
        let index = index_of(&["abc", "xyz", "abc xyz"]);
        let term = Term::or(vec![
            Term::Trigram(crate::index::types::bytes_to_trigram(b'a', b'b', b'c')),
            Term::Trigram(crate::index::types::bytes_to_trigram(b'x', b'y', b'z')),
        ]);
        assert_eq!(collect(candidates(&index, &term)), vec![0, 1, 2]);
    }

    #[test]
    fn test_and_short_circuits_on_missing_key() {
        let index = index_of(&["abc"]);
        let term = Term::and(vec![
            Term::Trigram(crate::index::types::bytes_to_trigram(b'a', b'b', b'c')),
            Term::Trigram(crate::index::types::bytes_to_trigram(b'n', b'o', b'p')),
        ]);
        assert!(collect(candidates(&index, &term)).is_empty());
    }
}
