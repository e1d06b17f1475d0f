//! Posting index construction over the finalized line table.
//!
//! One pass over the unique lines in id order emits a `(trigram, line)` pair
//! for every 3-byte window and a `(bigram, line)` pair for every adjacent
//! window pair. Because lines are visited in ascending id order, every
//! accumulated list is already sorted; adjacent duplicates (a key occurring
//! more than once in a line) are dropped as they are produced.

use crate::corpus::arena::ChunkArena;
use crate::index::postings::{encode_posting_list, PostingEntry};
use crate::index::types::{bytes_to_trigram, pack_bigram, Bigram, LineId, LineRef, Trigram};
use ahash::AHashMap;
use rayon::prelude::*;

pub(crate) fn build_postings(
    arena: &ChunkArena,
    lines: &[LineRef],
) -> (
    Vec<PostingEntry<Trigram>>,
    Vec<PostingEntry<Bigram>>,
    Vec<u8>,
) {
    let mut tri: AHashMap<Trigram, Vec<LineId>> = AHashMap::new();
    let mut big: AHashMap<Bigram, Vec<LineId>> = AHashMap::new();

    for (id, r) in lines.iter().enumerate() {
        let id = id as LineId;
        let bytes = arena.read(r.chunk, r.offset, r.len);
        if bytes.len() < 3 {
            continue;
        }
        for w in bytes.windows(3) {
            let t = bytes_to_trigram(w[0], w[1], w[2]);
            let list = tri.entry(t).or_default();
            if list.last() != Some(&id) {
                list.push(id);
            }
        }
        for w in bytes.windows(4) {
            let b = pack_bigram(
                bytes_to_trigram(w[0], w[1], w[2]),
                bytes_to_trigram(w[1], w[2], w[3]),
            );
            let list = big.entry(b).or_default();
            if list.last() != Some(&id) {
                list.push(id);
            }
        }
    }

    let (tri_encoded, big_encoded) = rayon::join(|| encode_map(tri), || encode_map(big));

    // Concatenate into one arena, unigram lists first, in key order so the
    // image is deterministic.
    let total: usize = tri_encoded.iter().map(|e| e.2.len()).sum::<usize>()
        + big_encoded.iter().map(|e| e.2.len()).sum::<usize>();
    let mut arena_bytes = Vec::with_capacity(total);

    let mut tri_dict = Vec::with_capacity(tri_encoded.len());
    for (key, count, bytes) in tri_encoded {
        tri_dict.push(PostingEntry {
            key,
            offset: arena_bytes.len() as u64,
            len: bytes.len() as u32,
            count,
        });
        arena_bytes.extend_from_slice(&bytes);
    }

    let mut big_dict = Vec::with_capacity(big_encoded.len());
    for (key, count, bytes) in big_encoded {
        big_dict.push(PostingEntry {
            key,
            offset: arena_bytes.len() as u64,
            len: bytes.len() as u32,
            count,
        });
        arena_bytes.extend_from_slice(&bytes);
    }

    (tri_dict, big_dict, arena_bytes)
}

fn encode_map<K: Ord + Copy + Send>(map: AHashMap<K, Vec<LineId>>) -> Vec<(K, u32, Vec<u8>)> {
    let mut entries: Vec<(K, Vec<LineId>)> = map.into_iter().collect();
    entries.sort_unstable_by_key(|(k, _)| *k);
    entries
        .into_par_iter()
        .map(|(k, ids)| (k, ids.len() as u32, encode_posting_list(&ids)))
        .collect()
}
