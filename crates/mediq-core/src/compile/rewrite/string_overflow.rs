//! String overflow handling for values longer than the inline column.
//!
//! The inline string column holds the first `MAX_INLINE_CHARS` characters;
//! longer values spill the full text into the overflow column. Prefix-style
//! matches keep a seekable predicate on the inline column and re-check the
//! overflow; suffix and substring matches can only scan the overflow.
//!
//! Gated on the schema generation that introduced the overflow column; on
//! older schemas long values stay on the inline column unchanged.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::QueryPlan,
        rewrite::{PassOutcome, RewritePass},
    },
    expr::{Expression, Field, StringMatch},
};

/// Character capacity of the inline string column.
pub const MAX_INLINE_CHARS: usize = 256;

pub struct StringOverflow;

impl RewritePass for StringOverflow {
    fn name(&self) -> &'static str {
        "string_overflow"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        if !ctx.schema.version.supports_string_overflow() {
            return Ok(PassOutcome::unchanged(plan));
        }

        let mut changed = false;
        for step in &mut plan.steps {
            if let Some(predicate) = step.predicate.take() {
                let (rewritten, touched) = rewrite(predicate);
                step.predicate = Some(rewritten);
                changed |= touched;
            }
        }

        if changed {
            Ok(PassOutcome::changed(plan))
        } else {
            Ok(PassOutcome::unchanged(plan))
        }
    }
}

fn rewrite(expr: Expression) -> (Expression, bool) {
    match expr {
        Expression::StringOp {
            op,
            field: Field::Text,
            value,
            ignore_case,
            component,
        } if value.chars().count() > MAX_INLINE_CHARS => (
            split(op, value, ignore_case, component),
            true,
        ),
        Expression::Multiary { op, children } => {
            let mut touched = false;
            let children = children
                .into_iter()
                .map(|c| {
                    let (c, t) = rewrite(c);
                    touched |= t;
                    c
                })
                .collect();
            (Expression::Multiary { op, children }, touched)
        }
        Expression::UnionAll { children } => {
            let mut touched = false;
            let children = children
                .into_iter()
                .map(|c| {
                    let (c, t) = rewrite(c);
                    touched |= t;
                    c
                })
                .collect();
            (Expression::UnionAll { children }, touched)
        }
        Expression::Not(inner) => {
            let (inner, touched) = rewrite(*inner);
            (Expression::not(inner), touched)
        }
        other => (other, false),
    }
}

fn split(
    op: StringMatch,
    value: String,
    ignore_case: bool,
    component: Option<usize>,
) -> Expression {
    let string_op = |op: StringMatch, field: Field, value: String| Expression::StringOp {
        op,
        field,
        value,
        ignore_case,
        component,
    };

    match op {
        StringMatch::Equals | StringMatch::StartsWith => {
            let prefix: String = value.chars().take(MAX_INLINE_CHARS).collect();
            string_op(StringMatch::StartsWith, Field::Text, prefix)
                & string_op(op, Field::TextOverflow, value)
        }
        StringMatch::EndsWith | StringMatch::Contains => {
            string_op(op, Field::TextOverflow, value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_value() -> String {
        "x".repeat(MAX_INLINE_CHARS + 10)
    }

    #[test]
    fn short_values_are_untouched() {
        let expr = Expression::string(StringMatch::Equals, Field::Text, "x".repeat(MAX_INLINE_CHARS));
        let (rewritten, touched) = rewrite(expr.clone());
        assert!(!touched, "boundary-length value stays inline");
        assert_eq!(rewritten, expr);
    }

    #[test]
    fn long_equals_checks_prefix_then_overflow() {
        let value = long_value();
        let (rewritten, touched) =
            rewrite(Expression::string(StringMatch::Equals, Field::Text, value.clone()));
        assert!(touched);

        let prefix: String = value.chars().take(MAX_INLINE_CHARS).collect();
        assert_eq!(
            rewritten,
            Expression::string(StringMatch::StartsWith, Field::Text, prefix)
                & Expression::string(StringMatch::Equals, Field::TextOverflow, value)
        );
    }

    #[test]
    fn long_contains_scans_only_the_overflow() {
        let value = long_value();
        let (rewritten, touched) =
            rewrite(Expression::string(StringMatch::Contains, Field::Text, value.clone()));
        assert!(touched);
        assert_eq!(
            rewritten,
            Expression::string(StringMatch::Contains, Field::TextOverflow, value)
        );
    }

    #[test]
    fn prefix_length_counts_characters_not_bytes() {
        let value = "é".repeat(MAX_INLINE_CHARS + 1);
        let (rewritten, touched) =
            rewrite(Expression::string(StringMatch::StartsWith, Field::Text, value));
        assert!(touched);

        let Expression::Multiary { children, .. } = rewritten else {
            panic!("expected conjunction");
        };
        let Expression::StringOp { value: prefix, .. } = &children[0] else {
            panic!("expected prefix match");
        };
        assert_eq!(prefix.chars().count(), MAX_INLINE_CHARS);
    }
}
