//! Root partitioning: classifying the top-level conjunction of a search
//! expression into denormalized predicates, table steps, and directives.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::{QueryPlan, SortState, StepKind, TableStep},
        table::{SearchTable, TableBinding, binding_for},
    },
    error::InternalError,
    expr::{Expression, QueryShapeHash},
};

/// Build the initial plan from a parsed expression.
///
/// The upstream parser contract guarantees the root is a conjunction (or a
/// single conjunct); a top-level disjunction here is a pipeline bug. Each
/// conjunct lands in exactly one plan slot: a denormalized resource
/// predicate, a table step, the sort slot, or an include step.
pub(crate) fn split(
    expr: Expression,
    shape: QueryShapeHash,
    ctx: &CompileContext<'_>,
) -> Result<QueryPlan, CompileError> {
    let mut plan = QueryPlan::new(shape);

    match expr {
        Expression::Multiary {
            op: crate::expr::MultiaryOp::And,
            children,
        } => {
            for child in children {
                classify(child, &mut plan, ctx)?;
            }
        }
        disjunction @ Expression::Multiary { .. } => {
            if disjunction.is_resource_only() {
                plan.resource_predicates.push(disjunction);
            } else {
                return Err(InternalError::rewrite_invariant(
                    "top-level disjunction must be normalized before compilation",
                )
                .into());
            }
        }
        other => classify(other, &mut plan, ctx)?,
    }

    Ok(plan)
}

fn classify(
    expr: Expression,
    plan: &mut QueryPlan,
    ctx: &CompileContext<'_>,
) -> Result<(), CompileError> {
    if expr.is_resource_only() {
        plan.resource_predicates.push(expr);
        return Ok(());
    }

    match expr {
        Expression::SearchParameter { param, inner } => match binding_for(&param)? {
            // Denormalized parameters address base-table columns directly;
            // the wrapper adds nothing once the binding is known.
            TableBinding::Denormalized => plan.resource_predicates.push(*inner),
            TableBinding::Table(table) => {
                plan.steps.push(TableStep::normal(table, param, Some(*inner)));
            }
        },

        Expression::MissingSearchParameter { param, is_missing } => {
            let table = match binding_for(&param)? {
                TableBinding::Table(table) => table,
                TableBinding::Denormalized => {
                    return Err(InternalError::rewrite_invariant(format!(
                        "missing-modifier on denormalized parameter '{}'",
                        param.code
                    ))
                    .into());
                }
            };
            // Kept as-is here; the not-exists pass turns the missing form
            // into a subtraction step.
            let predicate = is_missing
                .then(|| Expression::MissingSearchParameter {
                    param: param.clone(),
                    is_missing,
                });
            plan.steps.push(TableStep::normal(table, param, predicate));
        }

        Expression::Not(inner) => match *inner {
            Expression::SearchParameter { param, inner } => {
                let table = match binding_for(&param)? {
                    TableBinding::Table(table) => table,
                    TableBinding::Denormalized => {
                        return Err(InternalError::rewrite_invariant(
                            "negated denormalized parameter escaped resource classification",
                        )
                        .into());
                    }
                };
                plan.steps
                    .push(TableStep::normal(table, param, Some(Expression::not(*inner))));
            }
            other => {
                return Err(InternalError::rewrite_invariant(format!(
                    "unsupported top-level negation over {}",
                    other.kind_name()
                ))
                .into());
            }
        },

        Expression::Chained {
            param,
            source_types,
            target_types,
            reversed,
            inner,
        } => {
            let spec = crate::expr::ChainSpec {
                param,
                source_types,
                target_types,
                reversed,
            };
            let mut step = TableStep::chain(spec, 0);
            step.predicate = Some(*inner);
            plan.steps.push(step);
        }

        Expression::Compartment { .. } => {
            let mut step = TableStep::marker(StepKind::Normal, SearchTable::Compartment);
            step.predicate = Some(expr);
            plan.steps.push(step);
        }

        Expression::Include(spec) => plan.steps.push(TableStep::include(spec)),

        Expression::Sort { param, order } => {
            if plan.sort.is_some() {
                return Err(InternalError::rewrite_invariant(
                    "multiple sort directives in one expression",
                )
                .into());
            }
            plan.sort = Some(SortState::new(param, order));
        }

        other => {
            return Err(InternalError::rewrite_invariant(format!(
                "unscoped {} at expression root",
                other.kind_name()
            ))
            .into());
        }
    }

    // Context is unused today beyond error plumbing; partition analysis
    // reads it later in the pipeline.
    let _ = ctx;
    Ok(())
}
