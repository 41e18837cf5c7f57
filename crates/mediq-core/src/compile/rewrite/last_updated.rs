//! `_lastUpdated` lowering onto the surrogate key.
//!
//! The surrogate id embeds the truncated creation instant in its high bits,
//! so timestamp comparisons become seekable surrogate-id range predicates
//! on the clustered key instead of touching a timestamp column.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::QueryPlan,
        rewrite::{PassOutcome, RewritePass},
    },
    expr::{BinaryOp, Expression, Field, Value},
    surrogate::SurrogateId,
};

pub struct LastUpdated;

impl RewritePass for LastUpdated {
    fn name(&self) -> &'static str {
        "last_updated"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        _ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let mut changed = false;

        plan.resource_predicates = plan
            .resource_predicates
            .into_iter()
            .map(|p| {
                let (p, touched) = rewrite(p);
                changed |= touched;
                p
            })
            .collect();

        if changed {
            Ok(PassOutcome::changed(plan))
        } else {
            Ok(PassOutcome::unchanged(plan))
        }
    }
}

fn rewrite(expr: Expression) -> (Expression, bool) {
    match expr {
        Expression::Binary {
            field: Field::LastUpdated,
            op,
            value: Value::DateTime(dt),
            component: None,
        } => (lower(op, dt), true),
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
        Expression::Not(inner) => {
            let (inner, touched) = rewrite(*inner);
            (Expression::not(inner), touched)
        }
        other => (other, false),
    }
}

fn lower(op: BinaryOp, dt: chrono::DateTime<chrono::Utc>) -> Expression {
    let sid = |op: BinaryOp, id: SurrogateId| {
        Expression::binary(Field::ResourceSurrogateId, op, id)
    };
    let lo = SurrogateId::lower_bound(dt);
    let hi = SurrogateId::upper_bound(dt);

    match op {
        // Equality at millisecond precision spans the whole sequence range.
        BinaryOp::Eq => sid(BinaryOp::Gte, lo) & sid(BinaryOp::Lte, hi),
        BinaryOp::Ne => Expression::not(sid(BinaryOp::Gte, lo) & sid(BinaryOp::Lte, hi)),
        BinaryOp::Gte => sid(BinaryOp::Gte, lo),
        BinaryOp::Gt => sid(BinaryOp::Gt, hi),
        BinaryOp::Lte => sid(BinaryOp::Lte, hi),
        BinaryOp::Lt => sid(BinaryOp::Lt, lo),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn comparisons_map_to_surrogate_bounds() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        let lo = SurrogateId::lower_bound(dt);
        let hi = SurrogateId::upper_bound(dt);

        let (gte, touched) = rewrite(Expression::binary(Field::LastUpdated, BinaryOp::Gte, dt));
        assert!(touched);
        assert_eq!(
            gte,
            Expression::binary(Field::ResourceSurrogateId, BinaryOp::Gte, lo)
        );

        let (gt, _) = rewrite(Expression::binary(Field::LastUpdated, BinaryOp::Gt, dt));
        assert_eq!(
            gt,
            Expression::binary(Field::ResourceSurrogateId, BinaryOp::Gt, hi)
        );

        let (lt, _) = rewrite(Expression::binary(Field::LastUpdated, BinaryOp::Lt, dt));
        assert_eq!(
            lt,
            Expression::binary(Field::ResourceSurrogateId, BinaryOp::Lt, lo)
        );
    }

    #[test]
    fn equality_brackets_the_sequence_range() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        let (eq, _) = rewrite(Expression::binary(Field::LastUpdated, BinaryOp::Eq, dt));

        assert_eq!(
            eq,
            Expression::binary(
                Field::ResourceSurrogateId,
                BinaryOp::Gte,
                SurrogateId::lower_bound(dt)
            ) & Expression::binary(
                Field::ResourceSurrogateId,
                BinaryOp::Lte,
                SurrogateId::upper_bound(dt)
            )
        );
    }
}
