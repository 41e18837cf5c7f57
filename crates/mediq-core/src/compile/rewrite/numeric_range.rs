//! Numeric comparison lowering onto the (low, high) interval columns.
//!
//! Number and quantity values are stored as implicit-precision intervals,
//! so the logical fields never reach the code generator; every comparison
//! is rewritten here in terms of the interval bounds.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::QueryPlan,
        rewrite::{PassOutcome, RewritePass},
    },
    expr::{BinaryOp, Expression, Field, Value},
};

pub struct NumericRange;

impl RewritePass for NumericRange {
    fn name(&self) -> &'static str {
        "numeric_range"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        _ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
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

const fn bounds(field: Field) -> Option<(Field, Field)> {
    match field {
        Field::Number => Some((Field::NumberLow, Field::NumberHigh)),
        Field::QuantityValue => Some((Field::QuantityLow, Field::QuantityHigh)),
        _ => None,
    }
}

fn rewrite(expr: Expression) -> (Expression, bool) {
    match expr {
        Expression::Binary {
            field,
            op,
            value,
            component,
        } => match bounds(field) {
            Some((low, high)) => (lower(low, high, op, value, component), true),
            None => (
                Expression::Binary {
                    field,
                    op,
                    value,
                    component,
                },
                false,
            ),
        },
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

fn lower(
    low: Field,
    high: Field,
    op: BinaryOp,
    value: Value,
    component: Option<usize>,
) -> Expression {
    let bin = |field: Field, op: BinaryOp| Expression::Binary {
        field,
        op,
        value: value.clone(),
        component,
    };

    match op {
        // The stored interval must contain the searched value.
        BinaryOp::Eq => bin(low, BinaryOp::Lte) & bin(high, BinaryOp::Gte),
        BinaryOp::Ne => Expression::not(bin(low, BinaryOp::Lte) & bin(high, BinaryOp::Gte)),
        BinaryOp::Lt => bin(low, BinaryOp::Lt),
        BinaryOp::Gt => bin(high, BinaryOp::Gt),
        BinaryOp::Lte => bin(low, BinaryOp::Lte),
        BinaryOp::Gte => bin(high, BinaryOp::Gte),
    }
}
