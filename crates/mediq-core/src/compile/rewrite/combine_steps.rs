//! Step merging: adjacent filters on the same parameter collapse into one
//! table step.
//!
//! Two occurrences of the same parameter in a query (a date range given as
//! `ge` and `le`, for instance) address the same index rows; probing the
//! table twice only to intersect identical key sets is wasted work.

use crate::compile::{
    CompileError,
    context::CompileContext,
    plan::{QueryPlan, StepKind, TableStep},
    rewrite::{PassOutcome, RewritePass},
};

pub struct CombineSteps;

impl RewritePass for CombineSteps {
    fn name(&self) -> &'static str {
        "combine_steps"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        _ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let mut changed = false;
        let mut merged: Vec<TableStep> = Vec::with_capacity(plan.steps.len());

        for step in plan.steps {
            if let Some(prev) = merged.last_mut()
                && mergeable(prev, &step)
                && let Some(extra) = step.predicate.clone()
            {
                prev.conjoin(extra);
                changed = true;
                continue;
            }
            merged.push(step);
        }

        plan.steps = merged;
        if changed {
            Ok(PassOutcome::changed(plan))
        } else {
            Ok(PassOutcome::unchanged(plan))
        }
    }
}

fn mergeable(prev: &TableStep, next: &TableStep) -> bool {
    prev.kind == StepKind::Normal
        && next.kind == StepKind::Normal
        && prev.chain_level == 0
        && next.chain_level == 0
        && prev.table == next.table
        && prev.pushed_down.is_none()
        && next.pushed_down.is_none()
        && prev.predicate.is_some()
        && next.predicate.is_some()
        && match (&prev.param, &next.param) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compile::{context::CompileOptions, table::SearchTable},
        cursor::ContinuationSignature,
        expr::{BinaryOp, Expression, Field},
        schema::{
            ResourceTypeMap, SchemaModel, SchemaVersion,
            search_param::{SearchParamDef, SearchParamType},
        },
    };
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn ctx(schema: &SchemaModel) -> CompileContext<'_> {
        let shape = Expression::eq(Field::TokenCode, "x").shape_hash();
        CompileContext::new(
            schema,
            CompileOptions::default(),
            None,
            ContinuationSignature::compute(shape, schema.version),
        )
    }

    fn date_param() -> Arc<SearchParamDef> {
        Arc::new(SearchParamDef::new(
            "http://example.org/SearchParameter/date",
            "date",
            SearchParamType::Date,
        ))
    }

    #[test]
    fn same_parameter_range_halves_merge() {
        let schema = SchemaModel::new(ResourceTypeMap::new(["Patient"]), SchemaVersion::LATEST);
        let ctx = ctx(&schema);

        let lo = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let hi = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let param = date_param();

        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.steps.push(TableStep::normal(
            SearchTable::Date,
            param.clone(),
            Some(Expression::binary(Field::DateStart, BinaryOp::Gte, lo)),
        ));
        plan.steps.push(TableStep::normal(
            SearchTable::Date,
            param,
            Some(Expression::binary(Field::DateEnd, BinaryOp::Lte, hi)),
        ));

        let plan = CombineSteps.apply(plan, &ctx).unwrap().plan;

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(
            plan.steps[0].predicate,
            Some(
                Expression::binary(Field::DateStart, BinaryOp::Gte, lo)
                    & Expression::binary(Field::DateEnd, BinaryOp::Lte, hi)
            )
        );
    }

    #[test]
    fn different_parameters_stay_separate() {
        let schema = SchemaModel::new(ResourceTypeMap::new(["Patient"]), SchemaVersion::LATEST);
        let ctx = ctx(&schema);

        let other = Arc::new(SearchParamDef::new(
            "http://example.org/SearchParameter/issued",
            "issued",
            SearchParamType::Date,
        ));
        let lo = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.steps.push(TableStep::normal(
            SearchTable::Date,
            date_param(),
            Some(Expression::binary(Field::DateStart, BinaryOp::Gte, lo)),
        ));
        plan.steps.push(TableStep::normal(
            SearchTable::Date,
            other,
            Some(Expression::binary(Field::DateStart, BinaryOp::Gte, lo)),
        ));

        let plan = CombineSteps.apply(plan, &ctx).unwrap().plan;
        assert_eq!(plan.steps.len(), 2);
    }
}
