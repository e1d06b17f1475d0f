//! Repository specs and the pluggable source walker.
//!
//! The core never talks to a version-control system directly: anything
//! that can push `(tree, revision, path, bytes)` tuples into the corpus
//! store is a walker. The bundled [`DirWalker`] reads a working tree off
//! the filesystem (gitignore-aware) and labels it with whatever revision
//! names were requested; test harnesses supply synthetic walkers.

use crate::corpus::CorpusStore;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// One repository argument: `[name@]path[:rev1,rev2,...]`.
/// A missing name means an empty display name; missing revisions default
/// to a single `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub name: String,
    pub path: PathBuf,
    pub revs: Vec<String>,
}

impl RepoSpec {
    pub fn parse(spec: &str) -> Self {
        let (name, rest) = match spec.split_once('@') {
            Some((name, rest)) => (name.to_string(), rest),
            None => (String::new(), spec),
        };
        let (path, revs) = match rest.split_once(':') {
            Some((path, revs)) => (
                path,
                revs.split(',')
                    .filter(|r| !r.is_empty())
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>(),
            ),
            None => (rest, Vec::new()),
        };
        let revs = if revs.is_empty() {
            vec!["HEAD".to_string()]
        } else {
            revs
        };
        Self {
            name,
            path: PathBuf::from(path),
            revs,
        }
    }
}

/// A source of file tuples for one repository
pub trait SourceWalker {
    /// Push every file at `rev` into the store
    fn walk(&mut self, rev: &str, store: &mut CorpusStore) -> Result<()>;
}

/// Walks a directory tree on the filesystem, honoring ignore files, and
/// pushes the working tree's contents under the requested revision label.
pub struct DirWalker {
    tree: String,
    root: PathBuf,
}

impl DirWalker {
    pub fn new(tree: String, root: PathBuf) -> Self {
        Self { tree, root }
    }
}

impl SourceWalker for DirWalker {
    fn walk(&mut self, rev: &str, store: &mut CorpusStore) -> Result<()> {
        for entry in ignore::WalkBuilder::new(&self.root).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    eprintln!("trawl: walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let rel = relative_path(entry.path(), &self.root);
            let bytes = match std::fs::read(entry.path()) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("trawl: skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            store
                .add_file(&self.tree, rev, &rel, &bytes)
                .with_context(|| format!("failed to index {}", rel))?;
        }
        Ok(())
    }
}

fn relative_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
