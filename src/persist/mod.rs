//! Single-file on-disk index image.
//!
//! Layout:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (80 bytes)                            │
//! │  magic: [u8; 4] = "TRWL"                     │
//! │  version: u32                                │
//! │  flags: u32                                  │
//! │  chunk_count: u32                            │
//! │  posting_offset / posting_len: u64           │
//! │  meta_offset / meta_len: u64                 │
//! │  meta_crc32: u32                             │
//! │  header_crc32: u32 (over the bytes above)    │
//! ├──────────────────────────────────────────────┤
//! │ Chunk region (line bytes at fixed offsets)   │
//! ├──────────────────────────────────────────────┤
//! │ Posting arena (encoded posting lists)        │
//! ├──────────────────────────────────────────────┤
//! │ Metadata tables (little-endian, crc32'd)     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A dump-mode build writes chunk bytes into the file as they are interned,
//! so completing the image is just appending the posting arena and the
//! metadata and patching the header. Loading memory-maps the file once and
//! validates the header and metadata checksum; chunk bytes and posting
//! lists are then read straight out of the map through the same code paths
//! an in-memory index uses.

use crate::corpus::BuildStats;
use crate::index::postings::PostingEntry;
use crate::index::types::{
    Bigram, FileEntry, LineRef, TreeId, Trigram, CHUNK_SIZE,
};
use crate::index::{Index, IndexTables};
use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// Magic bytes identifying a trawl index file
pub const MAGIC: [u8; 4] = *b"TRWL";

/// Current format version; loaders refuse any other
pub const VERSION: u32 = 1;

/// Header size in bytes (fixed)
pub const HEADER_SIZE: usize = 80;

/// A byte region backed either by process memory or by the mapped index
/// file. Query code never distinguishes the two.
pub enum Bytes {
    Owned(Vec<u8>),
    Mapped {
        map: Arc<Mmap>,
        offset: usize,
        len: usize,
    },
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Bytes::Owned(v) => v,
            Bytes::Mapped { map, offset, len } => &map[*offset..*offset + *len],
        }
    }
}

/// Parsed index file header
#[derive(Debug, Clone)]
struct IndexHeader {
    chunk_count: u32,
    posting_offset: u64,
    posting_len: u64,
    meta_offset: u64,
    meta_len: u64,
    meta_crc: u32,
}

impl IndexHeader {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&0u32.to_le_bytes());
        buf[12..16].copy_from_slice(&self.chunk_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.posting_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.posting_len.to_le_bytes());
        buf[32..40].copy_from_slice(&self.meta_offset.to_le_bytes());
        buf[40..48].copy_from_slice(&self.meta_len.to_le_bytes());
        buf[48..52].copy_from_slice(&self.meta_crc.to_le_bytes());
        let crc = crc32fast::hash(&buf[..52]);
        buf[52..56].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            bail!("index file is too short to hold a header");
        }
        if data[0..4] != MAGIC {
            bail!("not a trawl index (bad magic)");
        }
        let stored_crc = read_u32(data, 52);
        let computed_crc = crc32fast::hash(&data[..52]);
        if stored_crc != computed_crc {
            bail!("index header checksum mismatch");
        }
        let version = read_u32(data, 4);
        if version != VERSION {
            bail!("unsupported index version {} (expected {})", version, VERSION);
        }
        Ok(Self {
            chunk_count: read_u32(data, 12),
            posting_offset: read_u64(data, 16),
            posting_len: read_u64(data, 24),
            meta_offset: read_u64(data, 32),
            meta_len: read_u64(data, 40),
            meta_crc: read_u32(data, 48),
        })
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(b)
}

/// Write an index built in memory (or previously loaded) out as a fresh
/// image at `path`.
pub fn dump(index: &Index, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create index file {}", path.display()))?;
    let mut w = BufWriter::with_capacity(1 << 16, file);

    w.write_all(&[0u8; HEADER_SIZE])?;
    let mut pos = HEADER_SIZE as u64;

    let mut spans: Vec<(u64, u32)> = Vec::with_capacity(index.chunks.len());
    for chunk in &index.chunks {
        let bytes: &[u8] = chunk;
        w.write_all(bytes)?;
        spans.push((pos, bytes.len() as u32));
        pos += bytes.len() as u64;
    }

    let posting_offset = pos;
    let arena: &[u8] = &index.postings.arena;
    w.write_all(arena)?;
    pos += arena.len() as u64;

    let meta = serialize_tables(&TableView::of_index(index, &spans));
    let meta_offset = pos;
    w.write_all(&meta)?;

    let header = IndexHeader {
        chunk_count: spans.len() as u32,
        posting_offset,
        posting_len: arena.len() as u64,
        meta_offset,
        meta_len: meta.len() as u64,
        meta_crc: crc32fast::hash(&meta),
    };
    w.seek(SeekFrom::Start(0))?;
    w.write_all(&header.to_bytes())?;
    w.flush()?;
    w.get_ref().sync_all()?;
    Ok(())
}

/// Complete a dump-mode build: chunk bytes are already in the file, so
/// append the posting arena and metadata, patch the header, and hand back
/// an index reading from the finished map.
pub(crate) fn complete_dump(
    mut file: File,
    spans: Vec<(u64, u32)>,
    tables: IndexTables,
    posting_bytes: Vec<u8>,
) -> Result<Index> {
    let posting_offset = spans
        .last()
        .map(|(off, _)| off + CHUNK_SIZE as u64)
        .unwrap_or(HEADER_SIZE as u64);

    file.seek(SeekFrom::Start(posting_offset))?;
    file.write_all(&posting_bytes)?;

    let meta = serialize_tables(&TableView::of_tables(&tables, &spans));
    let meta_offset = posting_offset + posting_bytes.len() as u64;
    file.write_all(&meta)?;

    let header = IndexHeader {
        chunk_count: spans.len() as u32,
        posting_offset,
        posting_len: posting_bytes.len() as u64,
        meta_offset,
        meta_len: meta.len() as u64,
        meta_crc: crc32fast::hash(&meta),
    };
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.to_bytes())?;
    file.sync_all()?;

    let map = Arc::new(unsafe { Mmap::map(&file) }.context("failed to map completed index")?);
    let chunks = spans
        .iter()
        .map(|&(off, len)| Bytes::Mapped {
            map: Arc::clone(&map),
            offset: off as usize,
            len: len as usize,
        })
        .collect();
    let arena = Bytes::Mapped {
        map,
        offset: posting_offset as usize,
        len: posting_bytes.len(),
    };
    Ok(Index::from_parts(chunks, tables, arena))
}

/// Map an index file and validate it. The returned index is semantically
/// identical to the in-memory index it was dumped from.
pub fn load(path: &Path) -> Result<Index> {
    let file = File::open(path)
        .with_context(|| format!("failed to open index file {}", path.display()))?;
    let map = Arc::new(
        unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to map index file {}", path.display()))?,
    );

    let header = IndexHeader::parse(&map)
        .with_context(|| format!("invalid index file {}", path.display()))?;

    let meta_start = header.meta_offset as usize;
    let meta_end = meta_start
        .checked_add(header.meta_len as usize)
        .filter(|&end| end <= map.len())
        .ok_or_else(|| anyhow::anyhow!("index metadata region out of bounds"))?;
    let meta = &map[meta_start..meta_end];
    if crc32fast::hash(meta) != header.meta_crc {
        bail!("index metadata checksum mismatch");
    }

    let (spans, tables) = deserialize_tables(meta)?;
    if spans.len() != header.chunk_count as usize {
        bail!("index chunk table disagrees with the header");
    }
    for &(off, len) in &spans {
        if off as usize + len as usize > map.len() {
            bail!("index chunk region out of bounds");
        }
    }
    for r in &tables.lines {
        let Some(&(_, chunk_len)) = spans.get(r.chunk as usize) else {
            bail!("line table references a missing chunk");
        };
        if r.offset.checked_add(r.len).map_or(true, |end| end > chunk_len) {
            bail!("line table entry out of chunk bounds");
        }
    }
    let posting_end = header.posting_offset + header.posting_len;
    if posting_end as usize > map.len() {
        bail!("index posting region out of bounds");
    }

    let chunks = spans
        .iter()
        .map(|&(off, len)| Bytes::Mapped {
            map: Arc::clone(&map),
            offset: off as usize,
            len: len as usize,
        })
        .collect();
    let arena = Bytes::Mapped {
        map,
        offset: header.posting_offset as usize,
        len: header.posting_len as usize,
    };
    Ok(Index::from_parts(chunks, tables, arena))
}

/// Borrowed view over everything the metadata section stores, so the
/// fresh-dump and complete-dump paths share one serializer.
struct TableView<'a> {
    spans: &'a [(u64, u32)],
    lines: &'a [LineRef],
    trees: &'a [String],
    revs: &'a [(TreeId, String)],
    files: &'a [FileEntry],
    content_bounds: &'a [u32],
    content_lines: &'a [u32],
    content_file_bounds: &'a [u32],
    content_file_ids: &'a [u32],
    occ_bounds: &'a [u32],
    occ_pairs: &'a [(u32, u32)],
    tri_dict: &'a [PostingEntry<Trigram>],
    big_dict: &'a [PostingEntry<Bigram>],
    stats: &'a BuildStats,
}

impl<'a> TableView<'a> {
    fn of_index(index: &'a Index, spans: &'a [(u64, u32)]) -> Self {
        Self {
            spans,
            lines: &index.lines,
            trees: &index.trees,
            revs: &index.revs,
            files: &index.files,
            content_bounds: &index.content_bounds,
            content_lines: &index.content_lines,
            content_file_bounds: &index.content_file_bounds,
            content_file_ids: &index.content_file_ids,
            occ_bounds: &index.occ_bounds,
            occ_pairs: &index.occ_pairs,
            tri_dict: &index.postings.trigrams,
            big_dict: &index.postings.bigrams,
            stats: &index.build_stats,
        }
    }

    fn of_tables(tables: &'a IndexTables, spans: &'a [(u64, u32)]) -> Self {
        Self {
            spans,
            lines: &tables.lines,
            trees: &tables.trees,
            revs: &tables.revs,
            files: &tables.files,
            content_bounds: &tables.content_bounds,
            content_lines: &tables.content_lines,
            content_file_bounds: &tables.content_file_bounds,
            content_file_ids: &tables.content_file_ids,
            occ_bounds: &tables.occ_bounds,
            occ_pairs: &tables.occ_pairs,
            tri_dict: &tables.tri_dict,
            big_dict: &tables.big_dict,
            stats: &tables.build_stats,
        }
    }
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn put_u32_slice(buf: &mut Vec<u8>, values: &[u32]) {
    put_u32(buf, values.len() as u32);
    for &v in values {
        put_u32(buf, v);
    }
}

fn serialize_tables(v: &TableView) -> Vec<u8> {
    let mut buf = Vec::new();

    put_u32(&mut buf, v.spans.len() as u32);
    for &(off, len) in v.spans {
        put_u64(&mut buf, off);
        put_u32(&mut buf, len);
    }

    put_u32(&mut buf, v.lines.len() as u32);
    for r in v.lines {
        put_u32(&mut buf, r.chunk);
        put_u32(&mut buf, r.offset);
        put_u32(&mut buf, r.len);
    }

    put_u32(&mut buf, v.trees.len() as u32);
    for t in v.trees {
        put_str(&mut buf, t);
    }

    put_u32(&mut buf, v.revs.len() as u32);
    for (tree, label) in v.revs {
        put_u32(&mut buf, *tree);
        put_str(&mut buf, label);
    }

    put_u32(&mut buf, v.files.len() as u32);
    for f in v.files {
        put_u32(&mut buf, f.tree);
        put_u32(&mut buf, f.content);
        put_str(&mut buf, &f.path);
        put_u32_slice(&mut buf, &f.revs);
    }

    put_u32_slice(&mut buf, v.content_bounds);
    put_u32_slice(&mut buf, v.content_lines);
    put_u32_slice(&mut buf, v.content_file_bounds);
    put_u32_slice(&mut buf, v.content_file_ids);
    put_u32_slice(&mut buf, v.occ_bounds);

    put_u32(&mut buf, v.occ_pairs.len() as u32);
    for &(content, idx) in v.occ_pairs {
        put_u32(&mut buf, content);
        put_u32(&mut buf, idx);
    }

    put_u32(&mut buf, v.tri_dict.len() as u32);
    for e in v.tri_dict {
        put_u32(&mut buf, e.key);
        put_u64(&mut buf, e.offset);
        put_u32(&mut buf, e.len);
        put_u32(&mut buf, e.count);
    }

    put_u32(&mut buf, v.big_dict.len() as u32);
    for e in v.big_dict {
        put_u64(&mut buf, e.key);
        put_u64(&mut buf, e.offset);
        put_u32(&mut buf, e.len);
        put_u32(&mut buf, e.count);
    }

    for field in [
        v.stats.files_seen,
        v.stats.files_indexed,
        v.stats.binary_files_skipped,
        v.stats.long_lines_skipped,
        v.stats.lines_indexed,
        v.stats.unique_lines,
        v.stats.contents,
        v.stats.file_entries,
        v.stats.chunk_bytes,
    ] {
        put_u64(&mut buf, field);
    }

    buf
}

/// Bounds-checked reader over the metadata section
struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| anyhow::anyhow!("index metadata truncated"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    fn str(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).context("index metadata holds invalid utf-8")
    }

    fn u32_vec(&mut self) -> Result<Vec<u32>> {
        let n = self.u32()? as usize;
        let mut out = Vec::with_capacity(n.min(1 << 24));
        for _ in 0..n {
            out.push(self.u32()?);
        }
        Ok(out)
    }

    fn done(&self) -> bool {
        self.pos == self.buf.len()
    }
}

fn deserialize_tables(meta: &[u8]) -> Result<(Vec<(u64, u32)>, IndexTables)> {
    let mut r = SliceReader::new(meta);

    let span_count = r.u32()? as usize;
    let mut spans = Vec::with_capacity(span_count.min(1 << 20));
    for _ in 0..span_count {
        let off = r.u64()?;
        let len = r.u32()?;
        spans.push((off, len));
    }

    let line_count = r.u32()? as usize;
    let mut lines = Vec::with_capacity(line_count.min(1 << 24));
    for _ in 0..line_count {
        lines.push(LineRef {
            chunk: r.u32()?,
            offset: r.u32()?,
            len: r.u32()?,
        });
    }

    let tree_count = r.u32()? as usize;
    let mut trees = Vec::with_capacity(tree_count.min(1 << 16));
    for _ in 0..tree_count {
        trees.push(r.str()?);
    }

    let rev_count = r.u32()? as usize;
    let mut revs = Vec::with_capacity(rev_count.min(1 << 16));
    for _ in 0..rev_count {
        let tree = r.u32()?;
        revs.push((tree, r.str()?));
    }

    let file_count = r.u32()? as usize;
    let mut files = Vec::with_capacity(file_count.min(1 << 24));
    for _ in 0..file_count {
        let tree = r.u32()?;
        let content = r.u32()?;
        let path = r.str()?;
        let file_revs = r.u32_vec()?;
        files.push(FileEntry {
            tree,
            content,
            path,
            revs: file_revs,
        });
    }

    let content_bounds = r.u32_vec()?;
    let content_lines = r.u32_vec()?;
    let content_file_bounds = r.u32_vec()?;
    let content_file_ids = r.u32_vec()?;
    let occ_bounds = r.u32_vec()?;

    let occ_count = r.u32()? as usize;
    let mut occ_pairs = Vec::with_capacity(occ_count.min(1 << 24));
    for _ in 0..occ_count {
        let content = r.u32()?;
        occ_pairs.push((content, r.u32()?));
    }

    let tri_count = r.u32()? as usize;
    let mut tri_dict = Vec::with_capacity(tri_count.min(1 << 24));
    for _ in 0..tri_count {
        tri_dict.push(PostingEntry {
            key: r.u32()?,
            offset: r.u64()?,
            len: r.u32()?,
            count: r.u32()?,
        });
    }

    let big_count = r.u32()? as usize;
    let mut big_dict = Vec::with_capacity(big_count.min(1 << 24));
    for _ in 0..big_count {
        big_dict.push(PostingEntry {
            key: r.u64()?,
            offset: r.u64()?,
            len: r.u32()?,
            count: r.u32()?,
        });
    }

    let build_stats = BuildStats {
        files_seen: r.u64()?,
        files_indexed: r.u64()?,
        binary_files_skipped: r.u64()?,
        long_lines_skipped: r.u64()?,
        lines_indexed: r.u64()?,
        unique_lines: r.u64()?,
        contents: r.u64()?,
        file_entries: r.u64()?,
        chunk_bytes: r.u64()?,
    };

    if !r.done() {
        bail!("index metadata has trailing bytes");
    }

    if content_bounds.last().copied().unwrap_or(0) as usize != content_lines.len() {
        bail!("content table bounds are inconsistent");
    }
    if occ_bounds.last().copied().unwrap_or(0) as usize != occ_pairs.len() {
        bail!("occurrence table bounds are inconsistent");
    }
    if occ_bounds.len() != lines.len() + 1 {
        bail!("occurrence table does not cover the line table");
    }
    if content_file_bounds.last().copied().unwrap_or(0) as usize != content_file_ids.len() {
        bail!("file table bounds are inconsistent");
    }

    let content_count = content_bounds.len().saturating_sub(1);
    for f in &files {
        if f.tree as usize >= trees.len()
            || f.content as usize >= content_count
            || f.revs.iter().any(|&r| r as usize >= revs.len())
        {
            bail!("file table references a missing tree, content or revision");
        }
    }
    if content_lines
        .iter()
        .any(|&l| l != crate::index::types::SKIPPED_LINE && l as usize >= lines.len())
    {
        bail!("content table references a missing line");
    }
    if occ_pairs.iter().any(|&(c, _)| c as usize >= content_count) {
        bail!("occurrence table references a missing content");
    }
    if content_file_ids.iter().any(|&f| f as usize >= files.len()) {
        bail!("file table references a missing file entry");
    }

    Ok((
        spans,
        IndexTables {
            lines,
            trees,
            revs,
            files,
            content_bounds,
            content_lines,
            content_file_bounds,
            content_file_ids,
            occ_bounds,
            occ_pairs,
            tri_dict,
            big_dict,
            build_stats,
        },
    ))
}
