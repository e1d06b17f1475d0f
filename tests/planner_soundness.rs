//! Planner soundness: for every pattern, the candidate set must contain
//! every line the regex matches. The corpus and the pattern pool are
//! deterministic, so a failure here is reproducible.

use trawl::corpus::CorpusStore;
use trawl::index::Index;
use trawl::plan::{self, candidates};

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
}

fn build_corpus() -> (Index, Vec<String>) {
    let mut rng = XorShift(0xfeed_beef_dead_cafe);
    const ALPHABET: &[u8] = b"abcdef 01_()[]{};.";
    let mut lines: Vec<String> = Vec::new();
    for _ in 0..2000 {
        let len = 5 + (rng.next() % 60) as usize;
        let line: String = (0..len)
            .map(|_| ALPHABET[(rng.next() % ALPHABET.len() as u64) as usize] as char)
            .collect();
        lines.push(line);
    }
    // Seed a few structured lines so selective patterns actually hit.
    lines.push("fn handle_request(req) {".to_string());
    lines.push("static int counter = 0;".to_string());
    lines.push("abba abcabc feedface".to_string());

    let mut store = CorpusStore::new();
    let body = lines.join("\n") + "\n";
    store
        .add_file("rand", "HEAD", "noise.txt", body.as_bytes())
        .unwrap();
    let index = store.finalize().unwrap();
    (index, lines)
}

fn candidate_set(index: &Index, pattern: &str, fold_case: bool) -> Vec<u32> {
    let compiled = plan::compile(pattern, fold_case).unwrap();
    let mut stream = candidates(index, &compiled.term);
    let mut out = Vec::new();
    while let Some(id) = stream.peek() {
        out.push(id);
        stream.advance();
    }
    out
}

const PATTERNS: &[&str] = &[
    "abc",
    "abcabc",
    "fee",
    "feedface",
    "handle_request",
    "static int",
    "fn .*req",
    "counter|feedface",
    "(ab){2}",
    "ab+a",
    "a(b|c)c",
    "[fs]tatic",
    "req\\)",
    "\\{$",
    "^fn ",
    "coun(t|x)er",
    "a.c",
    "fe*d",
];

#[test]
fn no_false_negatives() {
    let (index, _) = build_corpus();

    for &pattern in PATTERNS {
        for fold_case in [false, true] {
            let compiled = plan::compile(pattern, fold_case).unwrap();
            let candidate_lines = candidate_set(&index, pattern, fold_case);

            for id in 0..index.line_count() {
                if compiled.re.is_match(index.line_bytes(id)) {
                    assert!(
                        candidate_lines.contains(&id),
                        "pattern {:?} (fold_case={}) matches dropped line {}: {:?}",
                        pattern,
                        fold_case,
                        id,
                        String::from_utf8_lossy(index.line_bytes(id)),
                    );
                }
            }
        }
    }
}

#[test]
fn candidate_streams_are_sorted_and_unique() {
    let (index, _) = build_corpus();
    for &pattern in PATTERNS {
        let ids = candidate_set(&index, pattern, false);
        assert!(
            ids.windows(2).all(|w| w[0] < w[1]),
            "candidates for {:?} are not strictly increasing",
            pattern
        );
    }
}

#[test]
fn random_substrings_are_always_found() {
    let (index, lines) = build_corpus();
    let mut rng = XorShift(0x0123_4567_89ab_cdef);

    for _ in 0..200 {
        let line = &lines[(rng.next() % lines.len() as u64) as usize];
        if line.len() < 6 {
            continue;
        }
        let start = (rng.next() % (line.len() as u64 - 5)) as usize;
        let len = 3 + (rng.next() % 10) as usize;
        let end = (start + len).min(line.len());
        let needle: String = line[start..end].to_string();
        let pattern = regex::escape(&needle);

        let compiled = plan::compile(&pattern, false).unwrap();
        let ids = candidate_set(&index, &pattern, false);
        let mut verified = 0;
        for &id in &ids {
            if compiled.re.is_match(index.line_bytes(id)) {
                verified += 1;
            }
        }
        assert!(
            verified >= 1,
            "substring {:?} of an indexed line was not found",
            needle
        );
    }
}
