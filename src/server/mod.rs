//! The query server: listeners, admission control, sessions, protocols.

pub mod limiter;
pub mod listener;
pub mod protocol;
pub mod session;

pub use limiter::{QueryLimiter, QueryPermit};
pub use listener::{SearchServer, ServerOptions};

use crate::plan::{self, CompiledQuery, QueryError};
use anyhow::{bail, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Where to accept connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Unix(PathBuf),
    Tcp(String),
}

/// Parse a listen address: `unix://PATH`, `tcp://HOST:PORT`, or a bare
/// path, which means unix.
pub fn parse_listen_addr(spec: &str) -> Result<ListenAddr> {
    match spec.split_once("://") {
        None => Ok(ListenAddr::Unix(PathBuf::from(spec))),
        Some(("unix", rest)) => Ok(ListenAddr::Unix(PathBuf::from(rest))),
        Some(("tcp", rest)) => {
            if !rest.contains(':') {
                bail!("tcp listen addresses must be HOST:PORT");
            }
            Ok(ListenAddr::Tcp(rest.to_string()))
        }
        Some((proto, _)) => bail!("unknown listen protocol: {}", proto),
    }
}

/// Shared cache of compiled query bodies, keyed by (pattern, fold_case).
/// Sessions re-issue the same pattern constantly; planning is cheap but
/// regex compilation under the size cap is not.
pub struct RegexCache {
    inner: Mutex<LruCache<(String, bool), CompiledQuery>>,
}

impl RegexCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
        }
    }

    pub fn compile(&self, pattern: &str, fold_case: bool) -> Result<CompiledQuery, QueryError> {
        let key = (pattern.to_string(), fold_case);
        if let Ok(mut cache) = self.inner.lock() {
            if let Some(query) = cache.get(&key) {
                return Ok(query.clone());
            }
        }
        let query = plan::compile(pattern, fold_case)?;
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(key, query.clone());
        }
        Ok(query)
    }
}

static SIGNAL_SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_termination(_sig: libc::c_int) {
    SIGNAL_SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM into the shutdown flag the accept loop polls
pub fn install_signal_handlers() {
    let handler = handle_termination as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

/// True once a termination signal has been received
pub fn termination_requested() -> bool {
    SIGNAL_SHUTDOWN.load(Ordering::SeqCst)
}
