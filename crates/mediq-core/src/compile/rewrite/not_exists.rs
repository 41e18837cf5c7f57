//! Negation lowering: negated and `:missing=true` predicates become
//! subtraction steps.
//!
//! A subtraction step removes rows of the previous step that have a match
//! in its own table, so it needs a candidate set to subtract from; a plan
//! opening with a subtraction gets an all-rows seed step in front.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::{QueryPlan, StepKind, TableStep},
        rewrite::{PassOutcome, RewritePass},
    },
    expr::Expression,
};

pub struct NotExists;

impl RewritePass for NotExists {
    fn name(&self) -> &'static str {
        "not_exists"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        _ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let mut changed = false;

        for step in &mut plan.steps {
            match step.predicate.take() {
                Some(Expression::Not(inner)) => {
                    step.kind = StepKind::NotExists;
                    step.predicate = Some(*inner);
                    changed = true;
                }
                Some(Expression::MissingSearchParameter {
                    is_missing: true, ..
                }) => {
                    step.kind = StepKind::NotExists;
                    step.predicate = None;
                    changed = true;
                }
                other => step.predicate = other,
            }
        }

        if plan
            .steps
            .first()
            .is_some_and(|s| s.kind == StepKind::NotExists)
        {
            plan.steps.insert(0, TableStep::all());
            changed = true;
        }

        if changed {
            Ok(PassOutcome::changed(plan))
        } else {
            Ok(PassOutcome::unchanged(plan))
        }
    }
}
