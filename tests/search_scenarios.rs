//! End-to-end scenarios over a synthetic corpus: exact bounds, planner
//! selectivity, filters, case folding, cap rejection, and admission.

use std::io::BufReader;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trawl::corpus::CorpusStore;
use trawl::index::Index;
use trawl::plan;
use trawl::search::{MatchRecord, MatchStats, SearchRequest, Searcher};
use trawl::server::limiter::QueryLimiter;
use trawl::server::protocol::JsonInterface;
use trawl::server::session::interact;
use trawl::server::{RegexCache, ServerOptions};

fn collect_matches(index: &Index, req: &SearchRequest) -> (Vec<MatchRecord>, MatchStats) {
    let searcher = Searcher::new(index);
    let mut stats = MatchStats::default();
    let mut records = Vec::new();
    searcher
        .search(
            req,
            &mut |m| {
                records.push(m.clone());
                Ok(())
            },
            &mut stats,
        )
        .unwrap();
    (records, stats)
}

/// Two lines, one query, byte-exact bounds on both matches.
#[test]
fn exact_literal_bounds() {
    let mut store = CorpusStore::new();
    store
        .add_file("t", "HEAD", "w.txt", b"hello world\ngoodbye world\n")
        .unwrap();
    let index = store.finalize().unwrap();

    let query = plan::compile("world", false).unwrap();
    let (records, _) = collect_matches(&index, &SearchRequest::new(&query));

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].line, b"hello world");
    assert_eq!(records[0].bounds, (6, 11));
    assert_eq!(records[1].line, b"goodbye world");
    assert_eq!(records[1].bounds, (8, 13));
}

/// Deterministic generator for filler lines; no RNG dependency needed.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn line(&mut self, len: usize) -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789 _";
        (0..len)
            .map(|_| ALPHABET[(self.next() % ALPHABET.len() as u64) as usize] as char)
            .collect()
    }
}

/// A selective literal in a sea of noise must not force a corpus scan.
#[test]
fn trigram_planning_examines_few_candidates() {
    let mut rng = XorShift(0x1234_5678_9abc_def1);
    let mut body = String::new();
    for _ in 0..50_000 {
        body.push_str(&rng.line(40));
        body.push('\n');
    }
    body.push_str("xyzzy-token-unique\n");

    let mut store = CorpusStore::new();
    store
        .add_file("noise", "HEAD", "big.txt", body.as_bytes())
        .unwrap();
    let index = store.finalize().unwrap();

    let query = plan::compile("token-unique", false).unwrap();
    let (records, stats) = collect_matches(&index, &SearchRequest::new(&query));

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].line, b"xyzzy-token-unique");
    assert!(
        stats.candidates <= 10,
        "planner examined {} candidate lines",
        stats.candidates
    );
}

/// The file filter prunes by path after the line matches.
#[test]
fn file_filter_selects_one_path() {
    let mut store = CorpusStore::new();
    store
        .add_file("t", "HEAD", "src/a.c", b"int x = 42;\n")
        .unwrap();
    store
        .add_file("t", "HEAD", "src/b.c", b"int x = 42;\n")
        .unwrap();
    let index = store.finalize().unwrap();

    let query = plan::compile("int x", false).unwrap();
    let file_re = regex::Regex::new(r"a\.c").unwrap();
    let (records, _) = collect_matches(
        &index,
        &SearchRequest::new(&query).file_filter(Some(&file_re)),
    );

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "src/a.c");
}

/// Case-insensitive planning and matching agree on the bounds.
#[test]
fn case_insensitive_query() {
    let mut store = CorpusStore::new();
    store.add_file("t", "HEAD", "f", b"HelloWorld\n").unwrap();
    let index = store.finalize().unwrap();

    let query = plan::compile("hello", true).unwrap();
    let (records, _) = collect_matches(&index, &SearchRequest::new(&query));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].bounds, (0, 5));
}

/// An oversize pattern is rejected at the query boundary and the session
/// keeps serving.
#[test]
fn oversize_regex_leaves_connection_usable() {
    let mut store = CorpusStore::new();
    store.add_file("t", "HEAD", "f", b"still alive\n").unwrap();
    let index = store.finalize().unwrap();

    let limiter = QueryLimiter::new(2);
    let cache = RegexCache::new(8);
    let input = "{\"body\": \"(a|b){0,200}\"}\n{\"body\": \"alive\"}\n";
    let mut output: Vec<u8> = Vec::new();
    {
        let mut iface = JsonInterface {
            reader: BufReader::new(input.as_bytes()),
            writer: &mut output,
        };
        interact(
            &index,
            &limiter,
            &cache,
            &ServerOptions::default(),
            &mut iface,
        )
        .unwrap();
    }

    let lines: Vec<serde_json::Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(lines[0]["error"].is_string());
    assert_eq!(lines[1]["line"], "still alive");
    assert_eq!(lines[2]["done"], true);
}

/// No more than `concurrency` threads are ever inside the match engine.
#[test]
fn permit_conservation_under_load() {
    let mut store = CorpusStore::new();
    let mut body = String::new();
    for i in 0..50 {
        body.push_str(&format!("needle number {}\n", i));
    }
    store.add_file("t", "HEAD", "f", body.as_bytes()).unwrap();
    let index = Arc::new(store.finalize().unwrap());

    let limiter = Arc::new(QueryLimiter::new(2));
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let index = Arc::clone(&index);
        let limiter = Arc::clone(&limiter);
        let inside = Arc::clone(&inside);
        let peak = Arc::clone(&peak);
        handles.push(thread::spawn(move || {
            let query = plan::compile("needle", false).unwrap();
            let _permit = limiter.acquire();
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);

            let searcher = Searcher::new(&index);
            let mut stats = MatchStats::default();
            searcher
                .search(
                    &SearchRequest::new(&query),
                    &mut |_| {
                        thread::sleep(Duration::from_millis(1));
                        Ok(())
                    },
                    &mut stats,
                )
                .unwrap();

            inside.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

/// Byte-identical output for repeated runs of the same query.
#[test]
fn result_stream_is_deterministic() {
    let mut store = CorpusStore::new();
    store
        .add_file("beta", "HEAD", "z.txt", b"match one\nmatch two\n")
        .unwrap();
    store
        .add_file("alpha", "HEAD", "a.txt", b"match one\nother\n")
        .unwrap();
    let index = store.finalize().unwrap();

    let run = || {
        let limiter = QueryLimiter::new(2);
        let cache = RegexCache::new(8);
        let mut output: Vec<u8> = Vec::new();
        let mut iface = JsonInterface {
            reader: BufReader::new("{\"body\": \"match\"}\n".as_bytes()),
            writer: &mut output,
        };
        interact(
            &index,
            &limiter,
            &cache,
            &ServerOptions::default(),
            &mut iface,
        )
        .unwrap();
        drop(iface);
        output
    };

    let first = run();
    let second = run();
    // Strip the trailing done object, whose elapsed time differs.
    let body_of = |bytes: &[u8]| {
        let s = String::from_utf8(bytes.to_vec()).unwrap();
        s.lines()
            .filter(|l| !l.contains("\"done\""))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(body_of(&first), body_of(&second));
    assert!(!body_of(&first).is_empty());
}

/// Records for one line come out in (tree, path) order with revisions in
/// recording order.
#[test]
fn emission_order_is_tree_then_path() {
    let mut store = CorpusStore::new();
    store.add_file("zeta", "HEAD", "b", b"shared needle\n").unwrap();
    store.add_file("alpha", "HEAD", "z", b"shared needle\n").unwrap();
    store.add_file("alpha", "HEAD", "a", b"shared needle\n").unwrap();
    let index = store.finalize().unwrap();

    let query = plan::compile("needle", false).unwrap();
    let (records, _) = collect_matches(&index, &SearchRequest::new(&query));
    let order: Vec<(&str, &str)> = records
        .iter()
        .map(|r| (r.tree.as_str(), r.path.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![("alpha", "a"), ("alpha", "z"), ("zeta", "b")]
    );
}
