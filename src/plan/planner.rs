//! Regex-to-trigram planning.
//!
//! Walks the parsed regex (the `regex-syntax` HIR) and computes, for every
//! node, a [`Key`]: an optional *exact* literal set plus a posting [`Term`].
//! A node is exact when its entire match language is a small finite set of
//! byte strings; exactness is what lets concatenation form windows that
//! straddle subexpression boundaries. The resulting term's satisfying line
//! set is always a superset of the lines the regex can match; the match
//! engine re-verifies every candidate.

use crate::plan::term::{literal_windows, set_windows, Term};
use regex_syntax::hir::{Class, Hir, HirKind};

/// Most literal alternatives an exact node may carry
pub const MAX_LITS: usize = 32;

/// Longest literal an exact node may carry
pub const MAX_LIT_LEN: usize = 16;

/// Character classes wider than this many bytes stop being expanded into
/// one-byte alternatives
pub const CLASS_LIMIT: usize = 4;

/// Planning result for one HIR node
pub(crate) struct Key {
    /// `Some` iff the node is exact: the full set of strings it can match
    lits: Option<Vec<Vec<u8>>>,
    /// Required-window term; meaningful only when the node is inexact
    term: Term,
}

impl Key {
    fn exact(lits: Vec<Vec<u8>>) -> Self {
        Self {
            lits: Some(lits),
            term: Term::Any,
        }
    }

    fn inexact(term: Term) -> Self {
        Self { lits: None, term }
    }

    fn any() -> Self {
        Self::inexact(Term::Any)
    }

    /// Collapse to the posting term, turning an exact literal set into its
    /// window term.
    pub(crate) fn into_term(self) -> Term {
        match self.lits {
            Some(lits) => set_windows(&lits),
            None => self.term,
        }
    }
}

/// Plan a parsed regex into its candidate-filter term
pub(crate) fn plan_hir(hir: &Hir) -> Term {
    walk(hir).into_term()
}

fn walk(hir: &Hir) -> Key {
    match hir.kind() {
        // Empty and look-around assertions match the empty string: the
        // identity of concatenation.
        HirKind::Empty | HirKind::Look(_) => Key::exact(vec![Vec::new()]),

        HirKind::Literal(lit) => {
            let s = lit.0.to_vec();
            if s.len() > MAX_LIT_LEN {
                Key::inexact(literal_windows(&s))
            } else {
                Key::exact(vec![s])
            }
        }

        HirKind::Class(class) => class_key(class),

        HirKind::Capture(cap) => walk(&cap.sub),

        HirKind::Repetition(rep) => {
            if rep.min == 0 {
                // a*, a?, .* -- the body may be absent entirely.
                Key::any()
            } else {
                // At least one full body match occurs, so the body's
                // required windows stay required; the overall length is
                // unbounded, so exactness is lost.
                Key::inexact(walk(&rep.sub).into_term())
            }
        }

        HirKind::Concat(subs) => {
            let mut acc = Key::exact(vec![Vec::new()]);
            for sub in subs {
                acc = concat(acc, walk(sub));
            }
            acc
        }

        HirKind::Alternation(subs) => alternate(subs.iter().map(walk).collect()),
    }
}

fn concat(a: Key, b: Key) -> Key {
    if let (Some(al), Some(bl)) = (&a.lits, &b.lits) {
        if al.len().saturating_mul(bl.len()) <= MAX_LITS {
            let mut out = Vec::with_capacity(al.len() * bl.len());
            let mut fits = true;
            for x in al {
                for y in bl {
                    let mut s = Vec::with_capacity(x.len() + y.len());
                    s.extend_from_slice(x);
                    s.extend_from_slice(y);
                    if s.len() > MAX_LIT_LEN {
                        fits = false;
                    }
                    out.push(s);
                }
            }
            if fits {
                return Key::exact(out);
            }
            // The cross product got too long to stay exact, but its strings
            // are still the true match language here, so their windows
            // (including the boundary-straddling ones) are all required.
            return Key::inexact(set_windows(&out));
        }
        return Key::inexact(Term::and(vec![set_windows(al), set_windows(bl)]));
    }
    let ta = a.into_term();
    let tb = b.into_term();
    Key::inexact(Term::and(vec![ta, tb]))
}

fn alternate(keys: Vec<Key>) -> Key {
    let total: Option<usize> = keys
        .iter()
        .map(|k| k.lits.as_ref().map(|l| l.len()))
        .sum();
    if let Some(total) = total {
        if total <= MAX_LITS {
            let mut out = Vec::with_capacity(total);
            for k in keys {
                out.extend(k.lits.unwrap());
            }
            return Key::exact(out);
        }
    }
    Key::inexact(Term::or(keys.into_iter().map(Key::into_term).collect()))
}

/// A class of at most `CLASS_LIMIT` concrete ASCII bytes becomes an exact
/// set of one-byte alternatives; anything wider is unconstrained. Case
/// folding relies on this: folded letters arrive as two-byte classes.
fn class_key(class: &Class) -> Key {
    let mut bytes: Vec<u8> = Vec::new();
    match class {
        Class::Bytes(cb) => {
            for range in cb.ranges() {
                for b in range.start()..=range.end() {
                    bytes.push(b);
                    if bytes.len() > CLASS_LIMIT {
                        return Key::any();
                    }
                }
            }
        }
        Class::Unicode(cu) => {
            for range in cu.ranges() {
                for ch in range.start()..=range.end() {
                    if !ch.is_ascii() {
                        return Key::any();
                    }
                    bytes.push(ch as u8);
                    if bytes.len() > CLASS_LIMIT {
                        return Key::any();
                    }
                }
            }
        }
    }
    if bytes.is_empty() {
        return Key::any();
    }
    Key::exact(bytes.into_iter().map(|b| vec![b]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::types::{bytes_to_trigram, pack_bigram};

    fn plan(pattern: &str) -> Term {
        let hir = regex_syntax::ParserBuilder::new()
            .utf8(false)
            .build()
            .parse(pattern)
            .unwrap();
        plan_hir(&hir)
    }

    fn plan_folded(pattern: &str) -> Term {
        let hir = regex_syntax::ParserBuilder::new()
            .utf8(false)
            .case_insensitive(true)
            .build()
            .parse(pattern)
            .unwrap();
        plan_hir(&hir)
    }

    #[test]
    fn test_plain_literal() {
        assert_eq!(plan("abc"), Term::Trigram(bytes_to_trigram(b'a', b'b', b'c')));
        let t = plan("abcd");
        assert_eq!(
            t,
            Term::Bigram(pack_bigram(
                bytes_to_trigram(b'a', b'b', b'c'),
                bytes_to_trigram(b'b', b'c', b'd'),
            ))
        );
    }

    #[test]
    fn test_short_literal_is_any() {
        assert!(plan("ab").is_any());
        assert!(plan("").is_any());
    }

    #[test]
    fn test_dot_star_is_any() {
        assert!(plan(".*").is_any());
        assert!(plan("a?").is_any());
    }

    #[test]
    fn test_concat_straddles_dot() {
        // No exact windows can cross ".", but both literal islands are
        // required.
        let t = plan("foo.bar");
        match t {
            Term::And(parts) => {
                assert!(parts.contains(&Term::Trigram(bytes_to_trigram(b'f', b'o', b'o'))));
                assert!(parts.contains(&Term::Trigram(bytes_to_trigram(b'b', b'a', b'r'))));
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_small_class_expands() {
        // "[gs]et" is exactly {"get", "set"}
        let t = plan("[gs]et");
        assert_eq!(
            t,
            Term::Or(vec![
                Term::Trigram(bytes_to_trigram(b'g', b'e', b't')),
                Term::Trigram(bytes_to_trigram(b's', b'e', b't')),
            ])
        );
    }

    #[test]
    fn test_wide_class_is_any() {
        // The class contributes nothing and the "xy" tail is too short for
        // a window, so the whole plan is unconstrained.
        assert!(plan("[a-z]xy").is_any());
        // A long enough tail still constrains the plan.
        assert!(!plan("[a-z]xyz").is_any());
    }

    #[test]
    fn test_alternation_of_literals() {
        let t = plan("foo|bar");
        assert_eq!(
            t,
            Term::Or(vec![
                Term::Trigram(bytes_to_trigram(b'f', b'o', b'o')),
                Term::Trigram(bytes_to_trigram(b'b', b'a', b'r')),
            ])
        );
    }

    #[test]
    fn test_alternation_with_unbounded_side_is_any() {
        assert!(plan("foo|a*").is_any());
    }

    #[test]
    fn test_anchors_are_transparent() {
        assert_eq!(plan("^abc$"), Term::Trigram(bytes_to_trigram(b'a', b'b', b'c')));
    }

    #[test]
    fn test_plus_keeps_body_windows() {
        // "(abc)+" must contain at least one "abc"
        assert_eq!(plan("(abc)+"), Term::Trigram(bytes_to_trigram(b'a', b'b', b'c')));
    }

    #[test]
    fn test_case_fold_expands_via_classes() {
        // "(?i)abc" folds each letter into a two-byte class; the exact
        // cross product covers all case variants, so "aBc" lines are
        // candidates.
        let t = plan_folded("abc");
        match t {
            Term::Or(parts) => {
                assert!(parts.contains(&Term::Trigram(bytes_to_trigram(b'a', b'b', b'c'))));
                assert!(parts.contains(&Term::Trigram(bytes_to_trigram(b'A', b'B', b'C'))));
                assert!(parts.contains(&Term::Trigram(bytes_to_trigram(b'a', b'B', b'c'))));
                assert_eq!(parts.len(), 8);
            }
            other => panic!("expected Or of folded trigrams, got {:?}", other),
        }
    }

    #[test]
    fn test_fold_blowup_degrades_to_any() {
        // 2^10 case variants blow past MAX_LITS; the planner must fall back
        // rather than enumerate.
        let t = plan_folded("abcdefghij.*");
        // Still sound: either Any or some window term, but never a panic.
        let _ = t;
    }

    #[test]
    fn test_concat_straddle_windows() {
        // "ab" then "cd": the straddling windows exist only because both
        // sides are exact.
        let t = plan("(ab)(cd)");
        assert_eq!(
            t,
            Term::Bigram(pack_bigram(
                bytes_to_trigram(b'a', b'b', b'c'),
                bytes_to_trigram(b'b', b'c', b'd'),
            ))
        );
    }
}
