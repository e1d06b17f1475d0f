//! The immutable corpus index: line table, file metadata, posting lists.
//!
//! An [`Index`] is produced exactly once, either by
//! [`CorpusStore::finalize`](crate::corpus::CorpusStore::finalize) or by
//! [`persist::load`](crate::persist::load), and is read-only afterwards.
//! All lookups here are plain slice accesses; integrity violations panic
//! with a `corrupt index` diagnostic rather than returning errors, since a
//! broken index is unrecoverable by design.

pub mod build;
pub mod encoding;
pub mod postings;
pub mod types;

use crate::corpus::BuildStats;
use crate::persist::Bytes;
use postings::{PostingEntry, PostingIndex};
use types::{Bigram, ContentId, FileEntry, FileId, LineId, LineRef, RevId, TreeId, Trigram};

/// Everything the finalize step computes besides the chunk data itself.
/// Both allocator strategies produce the same tables; only the backing of
/// the chunk bytes and the posting arena differs.
pub(crate) struct IndexTables {
    pub lines: Vec<LineRef>,
    pub trees: Vec<String>,
    pub revs: Vec<(TreeId, String)>,
    pub files: Vec<FileEntry>,
    pub content_bounds: Vec<u32>,
    pub content_lines: Vec<LineId>,
    pub content_file_bounds: Vec<u32>,
    pub content_file_ids: Vec<FileId>,
    pub occ_bounds: Vec<u32>,
    pub occ_pairs: Vec<(ContentId, u32)>,
    pub tri_dict: Vec<PostingEntry<Trigram>>,
    pub big_dict: Vec<PostingEntry<Bigram>>,
    pub build_stats: BuildStats,
}

/// The finalized, immutable index
pub struct Index {
    pub(crate) chunks: Vec<Bytes>,
    pub(crate) lines: Vec<LineRef>,
    pub(crate) trees: Vec<String>,
    pub(crate) revs: Vec<(TreeId, String)>,
    pub(crate) files: Vec<FileEntry>,
    pub(crate) content_bounds: Vec<u32>,
    pub(crate) content_lines: Vec<LineId>,
    pub(crate) content_file_bounds: Vec<u32>,
    pub(crate) content_file_ids: Vec<FileId>,
    pub(crate) occ_bounds: Vec<u32>,
    pub(crate) occ_pairs: Vec<(ContentId, u32)>,
    pub(crate) postings: PostingIndex,
    pub(crate) build_stats: BuildStats,
}

impl Index {
    pub(crate) fn from_parts(chunks: Vec<Bytes>, tables: IndexTables, posting_arena: Bytes) -> Self {
        Self {
            chunks,
            lines: tables.lines,
            trees: tables.trees,
            revs: tables.revs,
            files: tables.files,
            content_bounds: tables.content_bounds,
            content_lines: tables.content_lines,
            content_file_bounds: tables.content_file_bounds,
            content_file_ids: tables.content_file_ids,
            occ_bounds: tables.occ_bounds,
            occ_pairs: tables.occ_pairs,
            postings: PostingIndex {
                trigrams: tables.tri_dict,
                bigrams: tables.big_dict,
                arena: posting_arena,
            },
            build_stats: tables.build_stats,
        }
    }

    /// Number of unique lines in the corpus
    pub fn line_count(&self) -> u32 {
        self.lines.len() as u32
    }

    /// The bytes of a line, without its terminating newline
    pub fn line_bytes(&self, id: LineId) -> &[u8] {
        let r = self
            .lines
            .get(id as usize)
            .unwrap_or_else(|| panic!("corrupt index: line id {} out of range", id));
        let chunk: &[u8] = &self.chunks[r.chunk as usize];
        &chunk[r.offset as usize..(r.offset + r.len) as usize]
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn tree_name(&self, tree: TreeId) -> &str {
        &self.trees[tree as usize]
    }

    pub fn rev_label(&self, rev: RevId) -> &str {
        &self.revs[rev as usize].1
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn file(&self, id: FileId) -> &FileEntry {
        &self.files[id as usize]
    }

    /// The ordered line-id sequence composing a content
    pub fn content_lines(&self, content: ContentId) -> &[LineId] {
        let lo = self.content_bounds[content as usize] as usize;
        let hi = self.content_bounds[content as usize + 1] as usize;
        &self.content_lines[lo..hi]
    }

    pub fn content_count(&self) -> usize {
        self.content_bounds.len().saturating_sub(1)
    }

    /// Files whose body is this content, sorted by (tree name, path)
    pub fn files_of_content(&self, content: ContentId) -> &[FileId] {
        let lo = self.content_file_bounds[content as usize] as usize;
        let hi = self.content_file_bounds[content as usize + 1] as usize;
        &self.content_file_ids[lo..hi]
    }

    /// Every (content, position) where this line occurs, ascending
    pub fn occurrences(&self, line: LineId) -> &[(ContentId, u32)] {
        let lo = self.occ_bounds[line as usize] as usize;
        let hi = self.occ_bounds[line as usize + 1] as usize;
        &self.occ_pairs[lo..hi]
    }

    pub fn postings(&self) -> &PostingIndex {
        &self.postings
    }

    pub fn build_stats(&self) -> &BuildStats {
        &self.build_stats
    }
}
