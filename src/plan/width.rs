//! NFA width of a regex, computed over its syntax tree as written.
//!
//! The width bounds the state fan-out a matcher can reach along any path:
//! alternation adds its branches, concatenation is limited by its widest
//! element, and a counted repetition multiplies its body by the repeat
//! bound. The walk runs on the AST rather than the translated HIR because
//! translation rewrites small alternations into character classes, which
//! would hide the fan-out the user actually asked for. Queries wider than
//! [`crate::plan::MAX_REGEX_WIDTH`] are rejected before execution.

use regex_syntax::ast::{Ast, RepetitionKind, RepetitionRange};

pub fn regex_width(ast: &Ast) -> u32 {
    match ast {
        Ast::Empty(_)
        | Ast::Flags(_)
        | Ast::Literal(_)
        | Ast::Dot(_)
        | Ast::Assertion(_)
        | Ast::ClassUnicode(_)
        | Ast::ClassPerl(_)
        | Ast::ClassBracketed(_) => 1,
        Ast::Group(group) => regex_width(&group.ast),
        Ast::Alternation(alt) => alt
            .asts
            .iter()
            .map(regex_width)
            .fold(0u32, |acc, w| acc.saturating_add(w)),
        Ast::Concat(concat) => concat.asts.iter().map(regex_width).max().unwrap_or(1),
        Ast::Repetition(rep) => {
            let w = regex_width(&rep.ast);
            match &rep.op.kind {
                RepetitionKind::ZeroOrOne
                | RepetitionKind::ZeroOrMore
                | RepetitionKind::OneOrMore => w,
                RepetitionKind::Range(range) => {
                    let bound = match range {
                        RepetitionRange::Exactly(n) => *n,
                        RepetitionRange::AtLeast(n) => *n,
                        RepetitionRange::Bounded(_, m) => *m,
                    };
                    w.saturating_mul(bound.max(1))
                }
            }
        }
    }
}
