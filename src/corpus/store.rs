use crate::corpus::arena::{chunk_file_offset, ChunkArena};
use crate::index::build::build_postings;
use crate::index::types::{
    ContentId, FileEntry, FileId, LineId, LineRef, RevId, TreeId, MAX_LINE_LEN, SKIPPED_LINE,
};
use crate::index::{Index, IndexTables};
use crate::persist::{self, Bytes};
use ahash::{AHashMap, RandomState};
use anyhow::{bail, Result};
use std::path::Path;

/// Counters collected while building the corpus
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub files_seen: u64,
    pub files_indexed: u64,
    pub binary_files_skipped: u64,
    pub long_lines_skipped: u64,
    pub lines_indexed: u64,
    pub unique_lines: u64,
    pub contents: u64,
    pub file_entries: u64,
    pub chunk_bytes: u64,
}

impl BuildStats {
    /// Print the counters to stderr, one per line
    pub fn log(&self) {
        eprintln!(
            "trawl: {} files ({} binary skipped), {} file entries, {} contents",
            self.files_seen, self.binary_files_skipped, self.file_entries, self.contents
        );
        eprintln!(
            "trawl: {} lines -> {} unique ({} over the length limit), {} chunk bytes",
            self.lines_indexed, self.unique_lines, self.long_lines_skipped, self.chunk_bytes
        );
    }
}

/// Mutable corpus builder. Accepts a stream of file tuples from the walker,
/// deduplicates lines and contents, and freezes into an [`Index`].
pub struct CorpusStore {
    arena: ChunkArena,
    hasher: RandomState,
    lines: Vec<LineRef>,
    /// line hash -> ids with that hash, verified by byte compare
    line_buckets: AHashMap<u64, Vec<LineId>>,
    contents: Vec<Vec<LineId>>,
    content_buckets: AHashMap<u64, Vec<ContentId>>,
    trees: Vec<String>,
    tree_ids: AHashMap<String, TreeId>,
    revs: Vec<(TreeId, String)>,
    rev_ids: AHashMap<(TreeId, String), RevId>,
    files: Vec<FileEntry>,
    file_ids: AHashMap<(TreeId, ContentId, String), FileId>,
    stats: BuildStats,
}

impl CorpusStore {
    /// Store backed by anonymous memory
    pub fn new() -> Self {
        Self::with_arena(ChunkArena::mem())
    }

    /// Store whose chunk data streams into the index file at `path`;
    /// finalize completes the file in place.
    pub fn with_dump(path: &Path) -> Result<Self> {
        Ok(Self::with_arena(ChunkArena::dump(path)?))
    }

    fn with_arena(arena: ChunkArena) -> Self {
        Self {
            arena,
            hasher: RandomState::new(),
            lines: Vec::new(),
            line_buckets: AHashMap::new(),
            contents: Vec::new(),
            content_buckets: AHashMap::new(),
            trees: Vec::new(),
            tree_ids: AHashMap::new(),
            revs: Vec::new(),
            rev_ids: AHashMap::new(),
            files: Vec::new(),
            file_ids: AHashMap::new(),
            stats: BuildStats::default(),
        }
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Add one file at one revision. Splits at newline boundaries, interns
    /// each line, and records the resulting content under the file's
    /// identity. Binary files are skipped entirely; overlong lines are
    /// dropped from the sequence but keep their slot for line numbering.
    pub fn add_file(&mut self, tree: &str, rev: &str, path: &str, bytes: &[u8]) -> Result<()> {
        self.stats.files_seen += 1;
        if is_binary(bytes) {
            self.stats.binary_files_skipped += 1;
            return Ok(());
        }

        let tree_id = self.intern_tree(tree);
        let rev_id = self.intern_rev(tree_id, rev);

        let mut seq: Vec<LineId> = Vec::new();
        if !bytes.is_empty() {
            let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
            for line in body.split(|&b| b == b'\n') {
                if line.len() > MAX_LINE_LEN {
                    self.stats.long_lines_skipped += 1;
                    seq.push(SKIPPED_LINE);
                } else {
                    seq.push(self.intern_line(line)?);
                }
            }
        }
        self.stats.lines_indexed += seq.len() as u64;

        let content = self.intern_content(seq);

        let key = (tree_id, content, path.to_string());
        if let Some(&fid) = self.file_ids.get(&key) {
            let file = &mut self.files[fid as usize];
            if !file.revs.contains(&rev_id) {
                file.revs.push(rev_id);
            }
        } else {
            let fid = self.files.len() as FileId;
            self.files.push(FileEntry {
                tree: tree_id,
                path: path.to_string(),
                content,
                revs: vec![rev_id],
            });
            self.file_ids.insert(key, fid);
        }
        self.stats.files_indexed += 1;
        Ok(())
    }

    fn intern_tree(&mut self, name: &str) -> TreeId {
        if let Some(&id) = self.tree_ids.get(name) {
            return id;
        }
        let id = self.trees.len() as TreeId;
        self.trees.push(name.to_string());
        self.tree_ids.insert(name.to_string(), id);
        id
    }

    fn intern_rev(&mut self, tree: TreeId, label: &str) -> RevId {
        if let Some(&id) = self.rev_ids.get(&(tree, label.to_string())) {
            return id;
        }
        let id = self.revs.len() as RevId;
        self.revs.push((tree, label.to_string()));
        self.rev_ids.insert((tree, label.to_string()), id);
        id
    }

    fn intern_line(&mut self, bytes: &[u8]) -> Result<LineId> {
        let hash = self.hasher.hash_one(bytes);
        if let Some(ids) = self.line_buckets.get(&hash) {
            for &id in ids {
                let r = self.lines[id as usize];
                if self.arena.read(r.chunk, r.offset, r.len) == bytes {
                    return Ok(id);
                }
            }
        }
        if self.lines.len() as u64 + 1 >= SKIPPED_LINE as u64 {
            bail!("corpus exceeds the line-id space");
        }
        let (chunk, offset) = self.arena.intern(bytes)?;
        let id = self.lines.len() as LineId;
        self.lines.push(LineRef {
            chunk,
            offset,
            len: bytes.len() as u32,
        });
        self.line_buckets.entry(hash).or_default().push(id);
        Ok(id)
    }

    fn intern_content(&mut self, seq: Vec<LineId>) -> ContentId {
        let hash = self.hasher.hash_one(seq.as_slice());
        if let Some(ids) = self.content_buckets.get(&hash) {
            for &id in ids {
                if self.contents[id as usize] == seq {
                    return id;
                }
            }
        }
        let id = self.contents.len() as ContentId;
        self.contents.push(seq);
        self.content_buckets.entry(hash).or_default().push(id);
        id
    }

    /// Freeze the corpus: build the content, occurrence and file tables and
    /// the posting index, release all scratch state, and return the
    /// immutable index. With a dump arena this also completes the on-disk
    /// image and the returned index reads from the mapped file.
    pub fn finalize(mut self) -> Result<Index> {
        // Scratch maps are no longer needed; free them before the posting
        // build, which is the peak of memory use.
        self.line_buckets = AHashMap::new();
        self.content_buckets = AHashMap::new();
        self.file_ids = AHashMap::new();
        self.tree_ids = AHashMap::new();
        self.rev_ids = AHashMap::new();

        self.stats.unique_lines = self.lines.len() as u64;
        self.stats.contents = self.contents.len() as u64;
        self.stats.file_entries = self.files.len() as u64;
        self.stats.chunk_bytes = self.arena.total_bytes();

        // Content CSR.
        let total_lines: usize = self.contents.iter().map(|s| s.len()).sum();
        let mut content_bounds = Vec::with_capacity(self.contents.len() + 1);
        let mut content_lines = Vec::with_capacity(total_lines);
        content_bounds.push(0u32);
        for seq in &self.contents {
            content_lines.extend_from_slice(seq);
            content_bounds.push(content_lines.len() as u32);
        }

        // Line occurrence CSR by counting sort, so each line's occurrence
        // list comes out sorted by (content, position).
        let n = self.lines.len();
        let mut occ_bounds = vec![0u32; n + 1];
        for &l in &content_lines {
            if l != SKIPPED_LINE {
                occ_bounds[l as usize + 1] += 1;
            }
        }
        for i in 1..occ_bounds.len() {
            occ_bounds[i] += occ_bounds[i - 1];
        }
        let mut cursor: Vec<u32> = occ_bounds[..n].to_vec();
        let mut occ_pairs: Vec<(ContentId, u32)> =
            vec![(0, 0); *occ_bounds.last().unwrap_or(&0) as usize];
        for (cid, seq) in self.contents.iter().enumerate() {
            for (idx, &l) in seq.iter().enumerate() {
                if l == SKIPPED_LINE {
                    continue;
                }
                let slot = cursor[l as usize] as usize;
                occ_pairs[slot] = (cid as ContentId, idx as u32);
                cursor[l as usize] += 1;
            }
        }

        // Content -> file CSR, each list in (tree name, path) order so the
        // match engine emits records in its documented order.
        let mut per_content: Vec<Vec<FileId>> = vec![Vec::new(); self.contents.len()];
        for (fid, file) in self.files.iter().enumerate() {
            per_content[file.content as usize].push(fid as FileId);
        }
        for list in &mut per_content {
            list.sort_by(|&a, &b| {
                let fa = &self.files[a as usize];
                let fb = &self.files[b as usize];
                (&self.trees[fa.tree as usize], &fa.path)
                    .cmp(&(&self.trees[fb.tree as usize], &fb.path))
            });
        }
        let mut content_file_bounds = Vec::with_capacity(per_content.len() + 1);
        let mut content_file_ids = Vec::with_capacity(self.files.len());
        content_file_bounds.push(0u32);
        for list in &per_content {
            content_file_ids.extend_from_slice(list);
            content_file_bounds.push(content_file_ids.len() as u32);
        }

        let (tri_dict, big_dict, posting_bytes) = build_postings(&self.arena, &self.lines);

        let tables = IndexTables {
            lines: self.lines,
            trees: self.trees,
            revs: self.revs,
            files: self.files,
            content_bounds,
            content_lines,
            content_file_bounds,
            content_file_ids,
            occ_bounds,
            occ_pairs,
            tri_dict,
            big_dict,
            build_stats: self.stats,
        };

        match self.arena {
            ChunkArena::Mem { chunks } => {
                let chunk_bytes: Vec<Bytes> = chunks.into_iter().map(Bytes::Owned).collect();
                Ok(Index::from_parts(
                    chunk_bytes,
                    tables,
                    Bytes::Owned(posting_bytes),
                ))
            }
            ChunkArena::Dump { file, map, used } => {
                // Chunk bytes are already at their final offsets; flush the
                // mapping and let persist append postings and metadata.
                if let Some(map) = &map {
                    map.flush()?;
                }
                drop(map);
                let spans: Vec<(u64, u32)> = used
                    .iter()
                    .enumerate()
                    .map(|(i, &len)| (chunk_file_offset(i as u32), len))
                    .collect();
                persist::complete_dump(file, spans, tables, posting_bytes)
            }
        }
    }
}

impl Default for CorpusStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A file is binary if its first 4 KiB contain a null byte
fn is_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(4096)];
    sample.contains(&0)
}
