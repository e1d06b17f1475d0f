//! # trawl - indexed regex search over source repositories
//!
//! trawl indexes the contents of one or more source-control repositories at
//! arbitrary revisions and serves interactive regular-expression queries
//! against them with sub-second latency.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`corpus`] - Content-addressed line storage with chunk allocation
//! - [`index`] - Trigram and bigram posting lists over the line corpus
//! - [`persist`] - Single-file on-disk index image (dump and load)
//! - [`plan`] - Regex-to-trigram planning and candidate evaluation
//! - [`search`] - Candidate verification and match emission
//! - [`server`] - Socket server, admission control, wire protocols
//! - [`walk`] - Repository specs and the pluggable source walker
//!
//! ## Quick start
//!
//! ```ignore
//! use trawl::corpus::CorpusStore;
//! use trawl::plan;
//! use trawl::search::{MatchStats, Searcher, SearchRequest};
//!
//! let mut store = CorpusStore::new();
//! store.add_file("demo", "HEAD", "hello.txt", b"hello world\n")?;
//! let index = store.finalize()?;
//!
//! let query = plan::compile("wor.d", false)?;
//! let searcher = Searcher::new(&index);
//! let mut stats = MatchStats::default();
//! searcher.search(
//!     &SearchRequest::new(&query).context(3),
//!     &mut |m| Ok(println!("{}:{}", m.path, m.line_number)),
//!     &mut stats,
//! )?;
//! ```
//!
//! ## Lifecycle
//!
//! An index is built exactly once per process, either by walking
//! repositories into a [`corpus::CorpusStore`] or by mapping a previously
//! dumped image with [`persist::load`]. After `finalize` the index is
//! immutable and any number of query threads may read it without
//! synchronization; the only lock on the hot path is the admission
//! semaphore in [`server`].

pub mod corpus;
pub mod index;
pub mod persist;
pub mod plan;
pub mod search;
pub mod server;
pub mod walk;
