//! Benchmarks for index build and query latency.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use trawl::corpus::CorpusStore;
use trawl::index::Index;
use trawl::plan;
use trawl::search::{MatchStats, SearchRequest, Searcher};

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

fn synthetic_body(lines: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789 _();{}";
    let mut rng = XorShift(0x5eed_cafe_f00d_d00d);
    let mut body = String::new();
    for i in 0..lines {
        if i % 100 == 0 {
            body.push_str("fn generated_function() {\n");
        } else {
            let len = 20 + (rng.next() % 40) as usize;
            for _ in 0..len {
                body.push(ALPHABET[(rng.next() % ALPHABET.len() as u64) as usize] as char);
            }
            body.push('\n');
        }
    }
    body
}

fn build_index(body: &str) -> Index {
    let mut store = CorpusStore::new();
    store
        .add_file("bench", "HEAD", "corpus.txt", body.as_bytes())
        .unwrap();
    store.finalize().unwrap()
}

fn bench_build(c: &mut Criterion) {
    let body = synthetic_body(20_000);
    c.bench_function("build_20k_lines", |b| {
        b.iter(|| black_box(build_index(&body)))
    });
}

fn bench_query(c: &mut Criterion) {
    let body = synthetic_body(50_000);
    let index = build_index(&body);

    let mut group = c.benchmark_group("query_50k_lines");
    for (name, pattern) in [
        ("selective_literal", "generated_function"),
        ("regex_with_islands", "fn .*\\(\\)"),
        ("unselective", "a.c"),
    ] {
        group.bench_function(name, |b| {
            let query = plan::compile(pattern, false).unwrap();
            let searcher = Searcher::new(&index);
            b.iter(|| {
                let mut stats = MatchStats::default();
                let mut hits = 0u64;
                searcher
                    .search(
                        &SearchRequest::new(&query),
                        &mut |_| {
                            hits += 1;
                            Ok(())
                        },
                        &mut stats,
                    )
                    .unwrap();
                black_box(hits)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_query);
criterion_main!(benches);
