//! One client session: read queries, run them under admission, stream
//! results.
//!
//! Every query-boundary failure (bad regex, cap rejection, malformed line)
//! is reported to the client and the loop continues; only transport errors
//! end the session. The admission permit is scoped so it is returned on
//! every path out of the match call, including client disconnects and
//! panics.

use crate::index::Index;
use crate::search::{MatchStats, SearchRequest, Searcher};
use crate::server::limiter::QueryLimiter;
use crate::server::protocol::{ClientInterface, ParsedQuery, ReadOutcome};
use crate::server::{RegexCache, ServerOptions};
use regex::Regex;
use std::io;
use std::time::Instant;

pub fn interact(
    index: &Index,
    limiter: &QueryLimiter,
    cache: &RegexCache,
    opts: &ServerOptions,
    iface: &mut dyn ClientInterface,
) -> io::Result<()> {
    let searcher = Searcher::new(index);

    loop {
        iface.prompt()?;
        let query: ParsedQuery = match iface.read_query()? {
            ReadOutcome::Eof => return Ok(()),
            ReadOutcome::Malformed(message) => {
                iface.write_error(&message)?;
                continue;
            }
            ReadOutcome::Query(q) => q,
        };

        let compiled = match cache.compile(&query.body, query.fold_case) {
            Ok(c) => c,
            Err(e) => {
                iface.write_error(&e.to_string())?;
                continue;
            }
        };
        let file_re = match compile_filter(query.file.as_deref(), "file") {
            Ok(re) => re,
            Err(message) => {
                iface.write_error(&message)?;
                continue;
            }
        };
        let tree_re = match compile_filter(query.tree.as_deref(), "tree") {
            Ok(re) => re,
            Err(message) => {
                iface.write_error(&message)?;
                continue;
            }
        };

        let mut stats = MatchStats::default();
        let started = Instant::now();
        let outcome = {
            let _permit = limiter.acquire();
            let request = SearchRequest::new(&compiled)
                .file_filter(file_re.as_ref())
                .tree_filter(tree_re.as_ref())
                .context(opts.context);
            let quiet = opts.quiet;
            searcher.search(
                &request,
                &mut |record| {
                    if quiet {
                        Ok(())
                    } else {
                        iface.write_match(record)
                    }
                },
                &mut stats,
            )
        };
        stats.elapsed = started.elapsed();

        if outcome.is_err() {
            // The client went away mid-stream; abandon the session. The
            // permit was already released when the scope above closed.
            return Ok(());
        }
        iface.write_stats(&stats)?;
    }
}

fn compile_filter(pattern: Option<&str>, which: &str) -> Result<Option<Regex>, String> {
    match pattern {
        None => Ok(None),
        Some(p) => Regex::new(p)
            .map(Some)
            .map_err(|e| format!("{} regex parse error: {}", which, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusStore;
    use crate::server::protocol::JsonInterface;
    use std::io::BufReader;

    fn demo_index() -> Index {
        let mut store = CorpusStore::new();
        store
            .add_file("repo", "HEAD", "src/a.c", b"int x = 42;\nint y = 7;\n")
            .unwrap();
        store
            .add_file("repo", "HEAD", "src/b.c", b"int x = 42;\n")
            .unwrap();
        store.finalize().unwrap()
    }

    fn run_session(index: &Index, input: &str, opts: &ServerOptions) -> Vec<serde_json::Value> {
        let limiter = QueryLimiter::new(2);
        let cache = RegexCache::new(8);
        let mut output: Vec<u8> = Vec::new();
        {
            let mut iface = JsonInterface {
                reader: BufReader::new(input.as_bytes()),
                writer: &mut output,
            };
            interact(index, &limiter, &cache, opts, &mut iface).unwrap();
        }
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_query_then_done() {
        let index = demo_index();
        let out = run_session(
            &index,
            "{\"body\": \"int x\"}\n",
            &ServerOptions::default(),
        );
        // Two matches (one per file) plus the done object.
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["path"], "src/a.c");
        assert_eq!(out[1]["path"], "src/b.c");
        assert_eq!(out[2]["done"], true);
        assert_eq!(out[2]["stats"]["matches"], 2);
    }

    #[test]
    fn test_error_keeps_connection_open() {
        let index = demo_index();
        let out = run_session(
            &index,
            "{\"body\": \"(a|b){0,200}\"}\n{\"body\": \"int y\"}\n",
            &ServerOptions::default(),
        );
        assert!(out[0]["error"].as_str().unwrap().contains("complex"));
        // The follow-up query still ran.
        assert_eq!(out[1]["path"], "src/a.c");
        assert_eq!(out[2]["done"], true);
    }

    #[test]
    fn test_bad_file_filter_reported() {
        let index = demo_index();
        let out = run_session(
            &index,
            "{\"body\": \"int\", \"file\": \"(\"}\n",
            &ServerOptions::default(),
        );
        assert!(out[0]["error"].as_str().unwrap().starts_with("file regex"));
    }

    #[test]
    fn test_quiet_suppresses_matches_keeps_stats() {
        let index = demo_index();
        let opts = ServerOptions {
            quiet: true,
            ..ServerOptions::default()
        };
        let out = run_session(&index, "{\"body\": \"int x\"}\n", &opts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["done"], true);
        assert_eq!(out[0]["stats"]["matches"], 2);
    }

    #[test]
    fn test_malformed_json_reported() {
        let index = demo_index();
        let out = run_session(&index, "not json\n{\"body\": \"int y\"}\n", &ServerOptions::default());
        assert!(out[0]["error"].as_str().unwrap().contains("parse"));
        assert_eq!(out[1]["path"], "src/a.c");
    }
}
