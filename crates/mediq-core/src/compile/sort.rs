//! Sort and pagination control.
//!
//! Sorting over a search-parameter table faces rows that have no value for
//! the sort field at all. Ascending searches serve those first (missing
//! phase), then the rows with values in keyset order (present phase);
//! descending searches go straight to the present phase. The continuation
//! token records which phase the page stopped in, including the explicit
//! phase-switch sentinel, so a resumed page never re-reads either side.
//!
//! A sort on `_lastUpdated` is surrogate order and needs no table step;
//! the partition analyzer and the final statement handle it.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::{QueryPlan, SortPhase, StepKind, TableStep},
        rewrite::{PassOutcome, RewritePass},
        table::{TableBinding, binding_for},
    },
    cursor::{SortResume, TokenError},
    error::InternalError,
    expr::SortOrder,
    schema::param_codes,
};

pub struct SortController;

impl RewritePass for SortController {
    fn name(&self) -> &'static str {
        "sort_controller"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let Some(mut sort) = plan.sort.take() else {
            // A sort resume against an unsorted query is a stale or forged
            // token.
            if ctx.token.as_ref().is_some_and(|t| t.sort.is_some()) {
                return Err(TokenError::Malformed {
                    reason: "token carries sort state for an unsorted query".into(),
                }
                .into());
            }
            return Ok(PassOutcome::unchanged(plan));
        };

        if sort.param.code == param_codes::LAST_UPDATED {
            sort.phase = Some(SortPhase::Filtered);
            plan.sort = Some(sort);
            return Ok(PassOutcome::changed(plan));
        }

        let table = match binding_for(&sort.param)? {
            TableBinding::Table(table) => table,
            TableBinding::Denormalized => {
                return Err(InternalError::planner_invariant(format!(
                    "denormalized sort parameter '{}' reached the sort controller",
                    sort.param.code
                ))
                .into());
            }
        };

        let filtered = plan.steps.iter().any(|s| {
            s.kind == StepKind::Normal
                && s.chain_level == 0
                && s.param.as_deref() == Some(&*sort.param)
        });

        if let Some(token) = &ctx.token {
            match &token.sort {
                None => {
                    return Err(TokenError::Malformed {
                        reason: "token lacks sort state for a sorted query".into(),
                    }
                    .into());
                }
                Some(SortResume::Missing) => {
                    sort.phase = Some(SortPhase::MissingValues);
                    sort.resume_surrogate = Some(token.surrogate_id);
                }
                Some(SortResume::SwitchToPresent) => {
                    // Fresh start on the present side; the token position
                    // belongs to the exhausted missing phase.
                    sort.phase = Some(SortPhase::PresentValues);
                }
                Some(SortResume::Value(value)) => {
                    sort.phase = Some(SortPhase::PresentValues);
                    sort.resume_value = Some(value.clone());
                    sort.resume_surrogate = Some(token.surrogate_id);
                }
            }
        } else if filtered {
            sort.phase = Some(SortPhase::Filtered);
        } else {
            sort.phase = Some(match sort.order {
                SortOrder::Ascending => SortPhase::MissingValues,
                SortOrder::Descending => SortPhase::PresentValues,
            });
        }

        // A filter on the sort parameter proves every candidate has a
        // value, so the missing phase can never produce rows.
        if filtered && sort.phase == Some(SortPhase::MissingValues) {
            sort.phase = Some(SortPhase::Filtered);
        }

        // The missing-values branch subtracts from its predecessor's key
        // set; a sort with no candidate-producing steps needs a base set to
        // subtract from. Include steps are planned after this pass and do
        // not produce candidates.
        if sort.phase == Some(SortPhase::MissingValues)
            && plan.steps.iter().all(TableStep::is_include_kind)
        {
            plan.steps.push(TableStep::all());
        }

        let step_kind = if filtered {
            StepKind::SortWithFilter
        } else {
            StepKind::Sort
        };
        let mut sort_step = TableStep::marker(step_kind, table);
        sort_step.param = Some(sort.param.clone());
        plan.steps.push(sort_step);
        plan.steps.push(TableStep::marker(StepKind::Top, table));

        plan.sort = Some(sort);
        Ok(PassOutcome::changed(plan))
    }
}
