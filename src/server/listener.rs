//! The accept loop: bind, admit connections, shut down cleanly.
//!
//! One OS thread per connection; the index is shared read-only behind an
//! `Arc` and the admission limiter is the only synchronization on the
//! query path. Shutdown is explicit: a flag (set programmatically or by a
//! termination signal) stops the accept loop, then in-flight sessions get
//! a bounded grace period to drain before the server returns.

use crate::index::Index;
use crate::server::limiter::QueryLimiter;
use crate::server::protocol::make_interface;
use crate::server::session::interact;
use crate::server::{termination_requested, ListenAddr, RegexCache};
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// How long the accept loop sleeps between shutdown checks
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// How long shutdown waits for in-flight sessions to drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Speak the structured JSON protocol instead of the human one
    pub json: bool,
    /// Run queries but suppress match output
    pub quiet: bool,
    /// Context lines on each side of a match
    pub context: usize,
    /// Queries allowed inside the match engine at once
    pub concurrency: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            json: false,
            quiet: false,
            context: 3,
            concurrency: 16,
        }
    }
}

#[derive(Clone)]
pub struct SearchServer {
    index: Arc<Index>,
    limiter: Arc<QueryLimiter>,
    cache: Arc<RegexCache>,
    opts: ServerOptions,
    shutdown: Arc<AtomicBool>,
    active: Arc<SessionCount>,
}

impl SearchServer {
    pub fn new(index: Arc<Index>, opts: ServerOptions) -> Self {
        Self {
            index,
            limiter: Arc::new(QueryLimiter::new(opts.concurrency)),
            cache: Arc::new(RegexCache::new(64)),
            opts,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(SessionCount::new()),
        }
    }

    pub fn limiter(&self) -> &QueryLimiter {
        &self.limiter
    }

    /// Ask the accept loop to stop; in-flight sessions drain first
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst) || termination_requested()
    }

    /// Accept and serve connections until shutdown
    pub fn run(&self, addr: &ListenAddr) -> Result<()> {
        let listener = AnyListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        match addr {
            ListenAddr::Unix(path) => eprintln!("trawl: listening on {}", path.display()),
            ListenAddr::Tcp(hostport) => eprintln!("trawl: listening on tcp://{}", hostport),
        }

        loop {
            if self.should_stop() {
                break;
            }
            match listener.accept_session() {
                Ok((reader, writer)) => self.spawn_session(reader, writer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    eprintln!("trawl: accept error: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        eprintln!("trawl: shutting down, draining in-flight queries");
        if !self.active.wait_idle(SHUTDOWN_GRACE) {
            eprintln!("trawl: grace period expired with sessions still active");
        }
        if let ListenAddr::Unix(path) = addr {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }

    /// Serve a single session over stdin/stdout (no listener)
    pub fn run_stdio(&self) -> Result<()> {
        let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(io::stdin()));
        let writer: Box<dyn Write + Send> = Box::new(BufWriter::new(io::stdout()));
        let mut iface = make_interface(self.opts.json, reader, writer);
        interact(
            &self.index,
            &self.limiter,
            &self.cache,
            &self.opts,
            iface.as_mut(),
        )
        .context("stdio session failed")
    }

    fn spawn_session(&self, reader: Box<dyn BufRead + Send>, writer: Box<dyn Write + Send>) {
        let server = self.clone();
        let guard = self.active.enter();
        thread::spawn(move || {
            let _guard = guard;
            let mut iface = make_interface(server.opts.json, reader, writer);
            if let Err(e) = interact(
                &server.index,
                &server.limiter,
                &server.cache,
                &server.opts,
                iface.as_mut(),
            ) {
                eprintln!("trawl: client error: {}", e);
            }
        });
    }
}

enum AnyListener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl AnyListener {
    fn bind(addr: &ListenAddr) -> Result<Self> {
        match addr {
            ListenAddr::Unix(path) => {
                // A stale socket file from a previous run blocks the bind.
                if path.exists() {
                    fs::remove_file(path).with_context(|| {
                        format!("failed to remove stale socket {}", path.display())
                    })?;
                }
                let listener = UnixListener::bind(path)
                    .with_context(|| format!("failed to bind {}", path.display()))?;
                Ok(AnyListener::Unix(listener))
            }
            ListenAddr::Tcp(hostport) => {
                let listener = TcpListener::bind(hostport.as_str())
                    .with_context(|| format!("failed to bind tcp://{}", hostport))?;
                Ok(AnyListener::Tcp(listener))
            }
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            AnyListener::Unix(l) => l.set_nonblocking(nonblocking),
            AnyListener::Tcp(l) => l.set_nonblocking(nonblocking),
        }
    }

    fn accept_session(&self) -> io::Result<(Box<dyn BufRead + Send>, Box<dyn Write + Send>)> {
        match self {
            AnyListener::Unix(l) => {
                let (stream, _) = l.accept()?;
                stream.set_nonblocking(false)?;
                let reader = stream.try_clone()?;
                Ok((
                    Box::new(BufReader::new(reader)),
                    Box::new(BufWriter::new(stream)),
                ))
            }
            AnyListener::Tcp(l) => {
                let (stream, _) = l.accept()?;
                stream.set_nonblocking(false)?;
                let reader = stream.try_clone()?;
                Ok((
                    Box::new(BufReader::new(reader)),
                    Box::new(BufWriter::new(stream)),
                ))
            }
        }
    }
}

/// Count of live sessions, waited on during shutdown
struct SessionCount {
    count: Mutex<usize>,
    idle: Condvar,
}

struct SessionGuard {
    counter: Arc<SessionCount>,
}

impl SessionCount {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn enter(self: &Arc<Self>) -> SessionGuard {
        let mut count = match self.count.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        *count += 1;
        drop(count);
        SessionGuard {
            counter: Arc::clone(self),
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = match self.count.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let (guard, result) = self
            .idle
            .wait_timeout_while(guard, timeout, |count| *count > 0)
            .unwrap_or_else(|p| p.into_inner());
        drop(guard);
        !result.timed_out()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut count = match self.counter.count.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        *count -= 1;
        drop(count);
        self.counter.idle.notify_all();
    }
}
