//! Rewrite pipeline: the ordered passes that turn a freshly partitioned
//! plan into one the code generator can walk.
//!
//! Every pass is pure: it consumes the plan and returns a new one. A pass
//! either applies fully or reports itself unchanged; partial application is
//! not a legal outcome. Pipeline order matters and is fixed here:
//!
//! 1. step shaping (chain flattening, step merging)
//! 2. value rewrites (dates, numerics, strings, `_lastUpdated`, not-exists)
//! 3. partition analysis and continuation narrowing
//! 4. physical specialization (reference typing, pushdown)
//! 5. tidy-up (reorder, flatten)
//! 6. sort/pagination control, then include planning
//!
//! Sort and its page cap run before include planning so includes expand
//! from the paged match set instead of being counted into the page.

pub mod chain_flatten;
pub mod combine_steps;
pub mod date_range;
pub mod flatten;
pub mod last_updated;
pub mod not_exists;
pub mod numeric_range;
pub mod partition_prune;
pub mod pushdown;
pub mod reorder;
pub mod root_split;
pub mod string_overflow;
pub mod untyped_reference;

use crate::compile::{
    CompileError, context::CompileContext, include::IncludePlanner, plan::QueryPlan,
    sort::SortController,
};

///
/// PassOutcome
///

pub struct PassOutcome {
    pub plan: QueryPlan,
    pub changed: bool,
}

impl PassOutcome {
    #[must_use]
    pub const fn unchanged(plan: QueryPlan) -> Self {
        Self {
            plan,
            changed: false,
        }
    }

    #[must_use]
    pub const fn changed(plan: QueryPlan) -> Self {
        Self {
            plan,
            changed: true,
        }
    }
}

///
/// RewritePass
///

pub trait RewritePass {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        plan: QueryPlan,
        ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError>;
}

///
/// PassReport
///
/// One pipeline entry in the compiled query's diagnostics.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PassReport {
    pub name: &'static str,
    pub changed: bool,
}

static PASSES: &[&(dyn RewritePass + Sync)] = &[
    &chain_flatten::ChainFlatten,
    &combine_steps::CombineSteps,
    &date_range::DateRange,
    &numeric_range::NumericRange,
    &string_overflow::StringOverflow,
    &last_updated::LastUpdated,
    &not_exists::NotExists,
    &partition_prune::PartitionPrune,
    &untyped_reference::UntypedReference,
    &pushdown::Pushdown,
    &reorder::Reorder,
    &flatten::Flatten,
    &SortController,
    &IncludePlanner,
];

/// Run every pass once, in order, collecting per-pass reports.
pub(crate) fn run_pipeline(
    mut plan: QueryPlan,
    ctx: &CompileContext<'_>,
) -> Result<(QueryPlan, Vec<PassReport>), CompileError> {
    let mut reports = Vec::with_capacity(PASSES.len());

    for pass in PASSES {
        let outcome = pass.apply(plan, ctx)?;
        plan = outcome.plan;

        if outcome.changed {
            tracing::debug!(pass = pass.name(), "rewrite pass applied");
        }
        reports.push(PassReport {
            name: pass.name(),
            changed: outcome.changed,
        });
    }

    Ok((plan, reports))
}
