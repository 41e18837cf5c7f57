//! Chain flattening: nested reference traversals become a run of steps.
//!
//! A chain group is emitted innermost-first: the target filter opens a
//! fresh key space (its `chain_level` exceeds its predecessor's), then one
//! reference step per hop walks back out, deepest first, ending at level 0
//! with the key set of the queried resources.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::{QueryPlan, StepKind, TableStep},
        rewrite::{PassOutcome, RewritePass},
        table::{SearchTable, TableBinding, binding_for},
    },
    error::InternalError,
    expr::{ChainSpec, Expression},
};

pub struct ChainFlatten;

impl RewritePass for ChainFlatten {
    fn name(&self) -> &'static str {
        "chain_flatten"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        _ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        if !plan.steps.iter().any(|s| s.kind == StepKind::Chain) {
            return Ok(PassOutcome::unchanged(plan));
        }

        let mut steps = Vec::with_capacity(plan.steps.len() + 2);
        for step in plan.steps {
            if step.kind == StepKind::Chain {
                expand(step, &mut steps)?;
            } else {
                steps.push(step);
            }
        }
        plan.steps = steps;

        Ok(PassOutcome::changed(plan))
    }
}

fn expand(step: TableStep, out: &mut Vec<TableStep>) -> Result<(), CompileError> {
    let first = step
        .chain
        .ok_or_else(|| InternalError::rewrite_invariant("chain step without a chain spec"))?;
    let mut inner = step
        .predicate
        .ok_or_else(|| InternalError::rewrite_invariant("chain step without an inner filter"))?;

    // Hops, outermost first.
    let mut specs = vec![first];
    while let Expression::Chained {
        param,
        source_types,
        target_types,
        reversed,
        inner: next,
    } = inner
    {
        specs.push(ChainSpec {
            param,
            source_types,
            target_types,
            reversed,
        });
        inner = *next;
    }

    let depth = u8::try_from(specs.len())
        .map_err(|_| InternalError::rewrite_invariant("chain nesting exceeds u8 levels"))?;

    out.push(target_step(inner, depth)?);

    for (level, spec) in specs.into_iter().enumerate().rev() {
        let level = u8::try_from(level)
            .map_err(|_| InternalError::rewrite_invariant("chain nesting exceeds u8 levels"))?;
        out.push(TableStep::chain(spec, level));
    }

    Ok(())
}

/// The innermost filter of the chain, applied to the ultimate target rows.
fn target_step(inner: Expression, depth: u8) -> Result<TableStep, CompileError> {
    if inner.is_resource_only() {
        let mut step = TableStep::marker(StepKind::Normal, SearchTable::Resource);
        step.predicate = Some(inner);
        step.chain_level = depth;
        return Ok(step);
    }

    match inner {
        Expression::SearchParameter { param, inner } => match binding_for(&param)? {
            TableBinding::Denormalized => {
                let mut step = TableStep::marker(StepKind::Normal, SearchTable::Resource);
                step.predicate = Some(*inner);
                step.chain_level = depth;
                Ok(step)
            }
            TableBinding::Table(table) => {
                let mut step = TableStep::normal(table, param, Some(*inner));
                step.chain_level = depth;
                Ok(step)
            }
        },
        other => Err(InternalError::rewrite_invariant(format!(
            "unsupported chain target: {}",
            other.kind_name()
        ))
        .into()),
    }
}
