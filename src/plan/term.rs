//! Boolean expressions over posting lists.
//!
//! A [`Term`] names a superset of the lines a regex can match: trigram and
//! bigram leaves are posting lookups, `And`/`Or` combine them, and `Any`
//! means "no useful constraint" (every line is a candidate). Construction
//! goes through [`Term::and`] / [`Term::or`], which flatten nesting, drop
//! redundant branches, and let `Any` absorb the way boolean algebra says it
//! must: `Any AND x = x`, `Any OR x = Any`.

use crate::index::types::{bytes_to_trigram, pack_bigram, Bigram, Trigram};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Trigram(Trigram),
    Bigram(Bigram),
    And(Vec<Term>),
    Or(Vec<Term>),
    Any,
}

impl Term {
    pub fn is_any(&self) -> bool {
        matches!(self, Term::Any)
    }

    /// Conjunction; `Any` members vanish, an empty conjunction is `Any`
    pub fn and(terms: Vec<Term>) -> Term {
        let mut parts: Vec<Term> = Vec::with_capacity(terms.len());
        for t in terms {
            match t {
                Term::Any => {}
                Term::And(inner) => {
                    for p in inner {
                        if !parts.contains(&p) {
                            parts.push(p);
                        }
                    }
                }
                other => {
                    if !parts.contains(&other) {
                        parts.push(other);
                    }
                }
            }
        }
        match parts.len() {
            0 => Term::Any,
            1 => parts.pop().unwrap(),
            _ => Term::And(parts),
        }
    }

    /// Disjunction; any `Any` member absorbs the whole expression
    pub fn or(terms: Vec<Term>) -> Term {
        let mut parts: Vec<Term> = Vec::with_capacity(terms.len());
        for t in terms {
            match t {
                Term::Any => return Term::Any,
                Term::Or(inner) => {
                    for p in inner {
                        if p.is_any() {
                            return Term::Any;
                        }
                        if !parts.contains(&p) {
                            parts.push(p);
                        }
                    }
                }
                other => {
                    if !parts.contains(&other) {
                        parts.push(other);
                    }
                }
            }
        }
        match parts.len() {
            0 => Term::Any,
            1 => parts.pop().unwrap(),
            _ => Term::Or(parts),
        }
    }
}

/// The required-window term of one literal string: the AND of its length-4
/// bigram windows when it has any (strictly stronger than the trigram
/// windows), its single trigram at length 3, `Any` below that.
pub fn literal_windows(s: &[u8]) -> Term {
    match s.len() {
        0..=2 => Term::Any,
        3 => Term::Trigram(bytes_to_trigram(s[0], s[1], s[2])),
        _ => Term::and(
            s.windows(4)
                .map(|w| {
                    Term::Bigram(pack_bigram(
                        bytes_to_trigram(w[0], w[1], w[2]),
                        bytes_to_trigram(w[1], w[2], w[3]),
                    ))
                })
                .collect(),
        ),
    }
}

/// The window term of a set of alternative literals: an OR over each
/// string's windows. One unconstrained alternative makes the set
/// unconstrained.
pub fn set_windows(lits: &[Vec<u8>]) -> Term {
    Term::or(lits.iter().map(|s| literal_windows(s)).collect())
}
