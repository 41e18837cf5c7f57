//! Step ordering: cheap set producers first, subtractions after something
//! exists to subtract from, includes last.
//!
//! The sort is stable and ranks a whole chain group identically, so the
//! innermost-first layout produced by chain flattening survives.

use crate::compile::{
    CompileError,
    context::CompileContext,
    plan::{QueryPlan, StepKind, TableStep},
    rewrite::{PassOutcome, RewritePass},
};

pub struct Reorder;

impl RewritePass for Reorder {
    fn name(&self) -> &'static str {
        "reorder"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        _ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let before: Vec<(StepKind, u8)> = plan.steps.iter().map(|s| (s.kind, s.chain_level)).collect();
        plan.steps.sort_by_key(rank);
        let changed = plan
            .steps
            .iter()
            .map(|s| (s.kind, s.chain_level))
            .ne(before);

        if changed {
            Ok(PassOutcome::changed(plan))
        } else {
            Ok(PassOutcome::unchanged(plan))
        }
    }
}

fn rank(step: &TableStep) -> u8 {
    if step.kind == StepKind::Chain || step.chain_level > 0 {
        return 1;
    }
    match step.kind {
        StepKind::All | StepKind::HoistedDenormalized => 0,
        StepKind::Chain => 1,
        StepKind::Normal | StepKind::Concatenation => 2,
        StepKind::Sort | StepKind::SortWithFilter | StepKind::Top => 3,
        StepKind::NotExists => 5,
        StepKind::Include | StepKind::IncludeLimit | StepKind::IncludeUnionAll => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compile::{context::CompileOptions, table::SearchTable},
        cursor::ContinuationSignature,
        expr::{Expression, Field},
        schema::{ResourceTypeMap, SchemaModel, SchemaVersion},
    };

    fn ctx(schema: &SchemaModel) -> CompileContext<'_> {
        let shape = Expression::eq(Field::TokenCode, "x").shape_hash();
        CompileContext::new(
            schema,
            CompileOptions::default(),
            None,
            ContinuationSignature::compute(shape, schema.version),
        )
    }

    fn marker(kind: StepKind) -> TableStep {
        TableStep::marker(kind, SearchTable::Resource)
    }

    #[test]
    fn subtractions_sink_below_producers() {
        let schema = SchemaModel::new(ResourceTypeMap::new(["Patient"]), SchemaVersion::LATEST);
        let ctx = ctx(&schema);

        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.steps = vec![
            marker(StepKind::NotExists),
            marker(StepKind::Normal),
            marker(StepKind::All),
        ];

        let plan = Reorder.apply(plan, &ctx).unwrap().plan;
        let kinds: Vec<StepKind> = plan.steps.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![StepKind::All, StepKind::Normal, StepKind::NotExists]
        );
    }

    #[test]
    fn chain_group_order_is_preserved() {
        let schema = SchemaModel::new(ResourceTypeMap::new(["Patient"]), SchemaVersion::LATEST);
        let ctx = ctx(&schema);

        let mut target = marker(StepKind::Normal);
        target.chain_level = 1;
        let chain = {
            let mut s = marker(StepKind::Chain);
            s.chain_level = 0;
            s
        };

        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.steps = vec![marker(StepKind::Normal), target.clone(), chain.clone()];

        let plan = Reorder.apply(plan, &ctx).unwrap().plan;

        // Group moves ahead of the plain step, target still before its hop.
        assert_eq!(plan.steps[0].chain_level, 1);
        assert_eq!(plan.steps[1].kind, StepKind::Chain);
        assert_eq!(plan.steps[2].kind, StepKind::Normal);
        assert_eq!(plan.steps[2].chain_level, 0);
    }

    #[test]
    fn ordered_plan_reports_unchanged() {
        let schema = SchemaModel::new(ResourceTypeMap::new(["Patient"]), SchemaVersion::LATEST);
        let ctx = ctx(&schema);

        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.steps = vec![marker(StepKind::All), marker(StepKind::Normal)];

        let outcome = Reorder.apply(plan, &ctx).unwrap();
        assert!(!outcome.changed);
    }
}
