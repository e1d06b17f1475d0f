//! Content-addressed corpus storage.
//!
//! The corpus deduplicates file contents at line granularity: every distinct
//! line is stored once in the chunk arena, files are sequences of line ids,
//! and identical files share a content id. The store is mutable only until
//! [`CorpusStore::finalize`], which produces the immutable [`crate::index::Index`].

pub mod arena;
pub mod store;

pub use arena::ChunkArena;
pub use store::{BuildStats, CorpusStore};
