//! Tree normalization: nested same-operator conjunctions splice into their
//! parent and single-child combinators collapse, over every predicate the
//! plan still carries.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::QueryPlan,
        rewrite::{PassOutcome, RewritePass},
    },
    expr::Expression,
};

pub struct Flatten;

impl RewritePass for Flatten {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        _ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let mut changed = false;

        let mut visit = |slot: &mut Option<Expression>| {
            if let Some(expr) = slot.take() {
                let (expr, touched) = flatten(expr);
                changed |= touched;
                *slot = Some(expr);
            }
        };

        for step in &mut plan.steps {
            visit(&mut step.predicate);
            visit(&mut step.pushed_down);
        }

        plan.resource_predicates = plan
            .resource_predicates
            .into_iter()
            .map(|p| {
                let (p, touched) = flatten(p);
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

pub(crate) fn flatten(expr: Expression) -> (Expression, bool) {
    match expr {
        Expression::Multiary { op, children } => {
            let mut touched = false;
            let mut flat = Vec::with_capacity(children.len());
            for child in children {
                let (child, t) = flatten(child);
                touched |= t;
                match child {
                    Expression::Multiary {
                        op: inner_op,
                        children: inner,
                    } if inner_op == op => {
                        touched = true;
                        flat.extend(inner);
                    }
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 {
                return (flat.remove(0), true);
            }
            (Expression::Multiary { op, children: flat }, touched)
        }
        Expression::UnionAll { children } => {
            let mut touched = false;
            let mut flat = Vec::with_capacity(children.len());
            for child in children {
                let (child, t) = flatten(child);
                touched |= t;
                match child {
                    Expression::UnionAll { children: inner } => {
                        touched = true;
                        flat.extend(inner);
                    }
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 {
                return (flat.remove(0), true);
            }
            (Expression::UnionAll { children: flat }, touched)
        }
        Expression::Not(inner) => {
            let (inner, touched) = flatten(*inner);
            (Expression::not(inner), touched)
        }
        other => (other, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Field;
    use proptest::prelude::*;

    fn leaf(n: u8) -> Expression {
        Expression::eq(Field::TokenCode, format!("v{n}"))
    }

    #[test]
    fn nested_conjunctions_splice() {
        let expr = Expression::and(vec![
            leaf(1),
            Expression::and(vec![leaf(2), Expression::and(vec![leaf(3), leaf(4)])]),
        ]);

        let (flat, touched) = flatten(expr);
        assert!(touched);
        assert_eq!(
            flat,
            Expression::and(vec![leaf(1), leaf(2), leaf(3), leaf(4)])
        );
    }

    #[test]
    fn singleton_combinators_collapse() {
        let (flat, touched) = flatten(Expression::and(vec![leaf(1)]));
        assert!(touched);
        assert_eq!(flat, leaf(1));
    }

    #[test]
    fn mixed_operators_do_not_splice() {
        let expr = Expression::and(vec![leaf(1), Expression::or(vec![leaf(2), leaf(3)])]);
        let (flat, touched) = flatten(expr.clone());
        assert!(!touched);
        assert_eq!(flat, expr);
    }

    fn arb_expr() -> impl Strategy<Value = Expression> {
        let leaf = (0u8..8).prop_map(leaf);
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4).prop_map(Expression::and),
                prop::collection::vec(inner.clone(), 1..4).prop_map(Expression::or),
                inner.prop_map(Expression::not),
            ]
        })
    }

    proptest! {
        #[test]
        fn flatten_is_idempotent(expr in arb_expr()) {
            let (once, _) = flatten(expr);
            let (twice, touched) = flatten(once.clone());
            prop_assert!(!touched);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn flatten_never_leaves_single_child_combinators(expr in arb_expr()) {
            fn check(e: &Expression) -> bool {
                match e {
                    Expression::Multiary { children, .. }
                    | Expression::UnionAll { children } => {
                        children.len() > 1 && children.iter().all(check)
                    }
                    Expression::Not(inner) => check(inner),
                    _ => true,
                }
            }
            let (flat, _) = flatten(expr);
            prop_assert!(check(&flat));
        }
    }
}
