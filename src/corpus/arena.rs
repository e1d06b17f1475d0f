//! The chunk arena: fixed-capacity byte buffers holding interned line data.
//!
//! Two allocation strategies satisfy the same contract. `Mem` backs chunks
//! with anonymous buffers and is purely in-process. `Dump` backs them with a
//! growable memory-mapped region of the eventual index file, so every chunk
//! byte is already at its final on-disk offset when the build finishes and
//! serializing the corpus data is a no-op.

use crate::index::types::{ChunkId, CHUNK_SIZE};
use crate::persist::HEADER_SIZE;
use anyhow::{Context, Result};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::Path;

pub enum ChunkArena {
    Mem {
        chunks: Vec<Vec<u8>>,
    },
    Dump {
        file: File,
        map: Option<MmapMut>,
        used: Vec<u32>,
    },
}

impl ChunkArena {
    /// Anonymous-memory arena
    pub fn mem() -> Self {
        ChunkArena::Mem { chunks: Vec::new() }
    }

    /// File-backed arena writing chunk bytes straight into `path`
    pub fn dump(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create index file {}", path.display()))?;
        file.set_len(HEADER_SIZE as u64)?;
        Ok(ChunkArena::Dump {
            file,
            map: None,
            used: Vec::new(),
        })
    }

    pub fn is_dump(&self) -> bool {
        matches!(self, ChunkArena::Dump { .. })
    }

    pub fn chunk_count(&self) -> u32 {
        match self {
            ChunkArena::Mem { chunks } => chunks.len() as u32,
            ChunkArena::Dump { used, .. } => used.len() as u32,
        }
    }

    pub fn chunk_len(&self, id: ChunkId) -> u32 {
        match self {
            ChunkArena::Mem { chunks } => chunks[id as usize].len() as u32,
            ChunkArena::Dump { used, .. } => used[id as usize],
        }
    }

    /// Total bytes interned across all chunks
    pub fn total_bytes(&self) -> u64 {
        match self {
            ChunkArena::Mem { chunks } => chunks.iter().map(|c| c.len() as u64).sum(),
            ChunkArena::Dump { used, .. } => used.iter().map(|&u| u as u64).sum(),
        }
    }

    /// Append `bytes` to the arena, opening a new chunk when the current one
    /// is full. Returns the (chunk, offset) location. `bytes` must not
    /// exceed `CHUNK_SIZE`.
    pub fn intern(&mut self, bytes: &[u8]) -> Result<(ChunkId, u32)> {
        debug_assert!(bytes.len() <= CHUNK_SIZE);
        let need_new = match self {
            ChunkArena::Mem { chunks } => chunks
                .last()
                .map(|c| c.len() + bytes.len() > CHUNK_SIZE)
                .unwrap_or(true),
            ChunkArena::Dump { used, .. } => used
                .last()
                .map(|&u| u as usize + bytes.len() > CHUNK_SIZE)
                .unwrap_or(true),
        };
        if need_new {
            self.push_chunk()?;
        }

        match self {
            ChunkArena::Mem { chunks } => {
                let id = chunks.len() as ChunkId - 1;
                let chunk = chunks.last_mut().unwrap();
                let offset = chunk.len() as u32;
                chunk.extend_from_slice(bytes);
                Ok((id, offset))
            }
            ChunkArena::Dump { map, used, .. } => {
                let id = used.len() as ChunkId - 1;
                let offset = used[id as usize];
                let base = chunk_file_offset(id) as usize + offset as usize;
                let map = map.as_mut().expect("dump arena has no mapping");
                map[base..base + bytes.len()].copy_from_slice(bytes);
                used[id as usize] = offset + bytes.len() as u32;
                Ok((id, offset))
            }
        }
    }

    /// Read interned bytes back out of the arena
    pub fn read(&self, chunk: ChunkId, offset: u32, len: u32) -> &[u8] {
        match self {
            ChunkArena::Mem { chunks } => {
                &chunks[chunk as usize][offset as usize..(offset + len) as usize]
            }
            ChunkArena::Dump { map, .. } => {
                let base = chunk_file_offset(chunk) as usize + offset as usize;
                let map = map.as_ref().expect("dump arena has no mapping");
                &map[base..base + len as usize]
            }
        }
    }

    fn push_chunk(&mut self) -> Result<()> {
        match self {
            ChunkArena::Mem { chunks } => {
                chunks.push(Vec::with_capacity(CHUNK_SIZE));
                Ok(())
            }
            ChunkArena::Dump { file, map, used } => {
                let next = used.len() as u32;
                let new_len = chunk_file_offset(next) + CHUNK_SIZE as u64;
                // Grow the file, then remap; the old mapping is dropped first
                // so platforms that forbid overlapping maps stay happy.
                *map = None;
                file.set_len(new_len)
                    .context("failed to grow index file for a new chunk")?;
                *map = Some(unsafe { MmapMut::map_mut(&*file) }.context("failed to map index file")?);
                used.push(0);
                Ok(())
            }
        }
    }
}

/// File offset of a chunk's slot in a dump-mode index file
pub fn chunk_file_offset(chunk: ChunkId) -> u64 {
    HEADER_SIZE as u64 + chunk as u64 * CHUNK_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_intern_and_read() {
        let mut arena = ChunkArena::mem();
        let (c0, o0) = arena.intern(b"hello world").unwrap();
        let (c1, o1) = arena.intern(b"goodbye").unwrap();
        assert_eq!((c0, o0), (0, 0));
        assert_eq!((c1, o1), (0, 11));
        assert_eq!(arena.read(c0, o0, 11), b"hello world");
        assert_eq!(arena.read(c1, o1, 7), b"goodbye");
        assert_eq!(arena.chunk_count(), 1);
        assert_eq!(arena.total_bytes(), 18);
    }

    #[test]
    fn test_dump_intern_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arena.idx");
        let mut arena = ChunkArena::dump(&path).unwrap();
        let (c, o) = arena.intern(b"mapped bytes").unwrap();
        assert_eq!(arena.read(c, o, 12), b"mapped bytes");
        assert!(arena.is_dump());

        // The bytes are already on disk at the chunk's slot.
        let raw = std::fs::read(&path).unwrap();
        let base = chunk_file_offset(0) as usize;
        assert_eq!(&raw[base..base + 12], b"mapped bytes");
    }
}
