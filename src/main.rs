use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use trawl::corpus::CorpusStore;
use trawl::index::Index;
use trawl::persist;
use trawl::server::{self, SearchServer, ServerOptions};
use trawl::walk::{DirWalker, RepoSpec, SourceWalker};

#[derive(Parser)]
#[command(name = "trawl")]
#[command(about = "Indexed regular-expression search over source repositories")]
struct Cli {
    /// Repositories to index: [name@]path[:rev1,rev2,...]
    repos: Vec<String>,

    /// Speak the structured JSON protocol instead of the human one
    #[arg(long)]
    json: bool,

    /// Number of queries allowed to run concurrently
    #[arg(long, default_value_t = 16)]
    concurrency: usize,

    /// Write the built index to this file
    #[arg(long, value_name = "PATH")]
    dump_index: Option<PathBuf>,

    /// Map an existing index file instead of walking repositories
    #[arg(long, value_name = "PATH")]
    load_index: Option<PathBuf>,

    /// Run queries but suppress match output (statistics only)
    #[arg(long)]
    quiet: bool,

    /// Listen address: unix://PATH or tcp://HOST:PORT (default unix)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Default tree name for repositories whose spec has none
    #[arg(long, default_value = "")]
    name: String,

    /// Context lines on each side of a match
    #[arg(long, default_value_t = 3)]
    context: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let index = initialize(&cli)?;

    let opts = ServerOptions {
        json: cli.json,
        quiet: cli.quiet,
        context: cli.context,
        concurrency: cli.concurrency,
    };
    let search_server = SearchServer::new(Arc::new(index), opts);

    match &cli.listen {
        Some(addr) => {
            server::install_signal_handlers();
            search_server.run(&server::parse_listen_addr(addr)?)?;
        }
        None => search_server.run_stdio()?,
    }
    Ok(())
}

/// Build the index from repository walks, or map a previously dumped one
fn initialize(cli: &Cli) -> Result<Index> {
    if let Some(path) = &cli.load_index {
        let index = persist::load(path)?;
        if let Some(dump) = &cli.dump_index {
            persist::dump(&index, dump)?;
        }
        return Ok(index);
    }

    let mut store = match &cli.dump_index {
        Some(path) => CorpusStore::with_dump(path)?,
        None => CorpusStore::new(),
    };

    let started = Instant::now();
    for spec in &cli.repos {
        let parsed = RepoSpec::parse(spec);
        let tree = if parsed.name.is_empty() {
            cli.name.clone()
        } else {
            parsed.name.clone()
        };
        eprintln!(
            "trawl: walking `{}' (name: {}, path: {})",
            spec,
            tree,
            parsed.path.display()
        );
        let mut walker = DirWalker::new(tree, parsed.path.clone());
        for rev in &parsed.revs {
            eprintln!("trawl:   {}...", rev);
            walker.walk(rev, &mut store)?;
        }
    }

    eprintln!("trawl: finalizing...");
    let index = store.finalize()?;
    eprintln!(
        "trawl: repository indexed in {:.2}s",
        started.elapsed().as_secs_f64()
    );
    if !cli.json {
        index.build_stats().log();
    }
    Ok(index)
}
