//! Date interval rewrites against the (start, end) storage encoding.
//!
//! Two shapes are recognized:
//!
//! - containment (`start >= lo AND end <= hi`): a redundant `start <= hi`
//!   bound is added so the seek range on the leading index column is
//!   closed on both sides.
//! - overlap (`end >= lo AND start <= hi`): split into a fast branch over
//!   short intervals, where `start >= lo - 1 day` makes the index seek
//!   possible, and a slow branch over the rare long intervals. The step
//!   becomes a concatenation of the two branches.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::{QueryPlan, StepKind},
        rewrite::{PassOutcome, RewritePass},
    },
    expr::{BinaryOp, Expression, Field, MultiaryOp, Value},
};
use chrono::{DateTime, Duration, Utc};

pub struct DateRange;

impl RewritePass for DateRange {
    fn name(&self) -> &'static str {
        "date_range"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        _ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let mut changed = false;

        for step in &mut plan.steps {
            let Some(predicate) = step.predicate.take() else {
                continue;
            };

            // The overlap split changes the step kind, so it only applies
            // when the matched conjunction is the step's whole predicate.
            if step.kind == StepKind::Normal
                && let Some(split) = overlap_split(&predicate)
            {
                step.predicate = Some(split);
                step.kind = StepKind::Concatenation;
                changed = true;
                continue;
            }

            let (rewritten, touched) = close_containment(predicate);
            step.predicate = Some(rewritten);
            changed |= touched;
        }

        if changed {
            Ok(PassOutcome::changed(plan))
        } else {
            Ok(PassOutcome::unchanged(plan))
        }
    }
}

fn date_bound(expr: &Expression, field: Field, op: BinaryOp) -> Option<DateTime<Utc>> {
    match expr {
        Expression::Binary {
            field: f,
            op: o,
            value: Value::DateTime(dt),
            component: None,
        } if *f == field && *o == op => Some(*dt),
        _ => None,
    }
}

/// Overlap shape: `end >= lo AND start <= hi` with no other conjuncts.
fn overlap_split(predicate: &Expression) -> Option<Expression> {
    let Expression::Multiary {
        op: MultiaryOp::And,
        children,
    } = predicate
    else {
        return None;
    };
    if children.len() != 2 {
        return None;
    }

    let lo = children
        .iter()
        .find_map(|c| date_bound(c, Field::DateEnd, BinaryOp::Gte))?;
    let hi = children
        .iter()
        .find_map(|c| date_bound(c, Field::DateStart, BinaryOp::Lte))?;

    let fast = Expression::and(vec![
        Expression::binary(Field::DateStart, BinaryOp::Gte, lo - Duration::days(1)),
        Expression::binary(Field::DateStart, BinaryOp::Lte, hi),
        Expression::binary(Field::DateEnd, BinaryOp::Gte, lo),
        Expression::eq(Field::DateIsLongerThanADay, Value::Bool(false)),
    ]);
    let slow = Expression::and(vec![
        Expression::binary(Field::DateEnd, BinaryOp::Gte, lo),
        Expression::binary(Field::DateStart, BinaryOp::Lte, hi),
        Expression::eq(Field::DateIsLongerThanADay, Value::Bool(true)),
    ]);

    Some(Expression::UnionAll {
        children: vec![fast, slow],
    })
}

/// Containment shape: add the redundant upper bound on `start`.
fn close_containment(expr: Expression) -> (Expression, bool) {
    match expr {
        Expression::Multiary {
            op: MultiaryOp::And,
            mut children,
        } => {
            let lo_hi = {
                let has_lower = children
                    .iter()
                    .any(|c| date_bound(c, Field::DateStart, BinaryOp::Gte).is_some());
                let hi = children
                    .iter()
                    .find_map(|c| date_bound(c, Field::DateEnd, BinaryOp::Lte));
                let already_closed = children
                    .iter()
                    .any(|c| date_bound(c, Field::DateStart, BinaryOp::Lte).is_some());
                match (has_lower, hi, already_closed) {
                    (true, Some(hi), false) => Some(hi),
                    _ => None,
                }
            };

            let mut touched = false;
            if let Some(hi) = lo_hi {
                children.push(Expression::binary(Field::DateStart, BinaryOp::Lte, hi));
                touched = true;
            }

            let children = children
                .into_iter()
                .map(|c| {
                    let (c, t) = close_containment(c);
                    touched |= t;
                    c
                })
                .collect();
            (Expression::and(children), touched)
        }
        Expression::Multiary {
            op: MultiaryOp::Or,
            children,
        } => {
            let mut touched = false;
            let children = children
                .into_iter()
                .map(|c| {
                    let (c, t) = close_containment(c);
                    touched |= t;
                    c
                })
                .collect();
            (Expression::or(children), touched)
        }
        other => (other, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lo() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn hi() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap()
    }

    #[test]
    fn containment_gains_a_closing_bound() {
        let expr = Expression::and(vec![
            Expression::binary(Field::DateStart, BinaryOp::Gte, lo()),
            Expression::binary(Field::DateEnd, BinaryOp::Lte, hi()),
        ]);

        let (rewritten, touched) = close_containment(expr);
        assert!(touched);

        let Expression::Multiary { children, .. } = rewritten else {
            panic!("expected conjunction");
        };
        assert_eq!(children.len(), 3);
        assert_eq!(
            children[2],
            Expression::binary(Field::DateStart, BinaryOp::Lte, hi())
        );
    }

    #[test]
    fn containment_rewrite_is_idempotent() {
        let expr = Expression::and(vec![
            Expression::binary(Field::DateStart, BinaryOp::Gte, lo()),
            Expression::binary(Field::DateEnd, BinaryOp::Lte, hi()),
        ]);

        let (once, _) = close_containment(expr);
        let (twice, touched) = close_containment(once.clone());
        assert!(!touched);
        assert_eq!(once, twice);
    }

    #[test]
    fn overlap_splits_into_fast_and_slow_branches() {
        let expr = Expression::and(vec![
            Expression::binary(Field::DateEnd, BinaryOp::Gte, lo()),
            Expression::binary(Field::DateStart, BinaryOp::Lte, hi()),
        ]);

        let Some(Expression::UnionAll { children }) = overlap_split(&expr) else {
            panic!("expected a union split");
        };
        assert_eq!(children.len(), 2);

        // Branches are disjoint on the long-interval flag.
        let flag_of = |branch: &Expression| -> Option<bool> {
            let Expression::Multiary { children, .. } = branch else {
                return None;
            };
            children.iter().find_map(|c| match c {
                Expression::Binary {
                    field: Field::DateIsLongerThanADay,
                    op: BinaryOp::Eq,
                    value: Value::Bool(b),
                    ..
                } => Some(*b),
                _ => None,
            })
        };
        assert_eq!(flag_of(&children[0]), Some(false));
        assert_eq!(flag_of(&children[1]), Some(true));

        // The fast branch widens its seek window by one day.
        let Expression::Multiary { children: fast, .. } = &children[0] else {
            panic!("expected conjunction");
        };
        assert_eq!(
            fast[0],
            Expression::binary(Field::DateStart, BinaryOp::Gte, lo() - Duration::days(1))
        );
    }
}
