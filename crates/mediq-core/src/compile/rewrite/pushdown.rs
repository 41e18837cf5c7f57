//! Predicate pushdown into partitioned search tables.
//!
//! On partitioned schemas the search tables carry the resource type and
//! surrogate id, so type and surrogate restrictions from the base table can
//! be repeated inside each step where they enable partition elimination at
//! the step level. The originals stay in `resource_predicates`; pushdown
//! only ever adds redundant copies.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::{QueryPlan, StepKind, TableStep},
        rewrite::{PassOutcome, RewritePass},
        table::SearchTable,
    },
    expr::{Expression, Field, MultiaryOp},
};

pub struct Pushdown;

impl RewritePass for Pushdown {
    fn name(&self) -> &'static str {
        "pushdown"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        if !ctx.schema.version.supports_partitioned_tables() {
            return Ok(PassOutcome::unchanged(plan));
        }

        let pushable: Vec<Expression> = plan
            .resource_predicates
            .iter()
            .filter(|p| is_pushable(p))
            .cloned()
            .collect();
        if pushable.is_empty() {
            return Ok(PassOutcome::unchanged(plan));
        }

        let combined = conjoin_all(pushable);
        let mut changed = false;

        for step in &mut plan.steps {
            if !accepts_pushdown(step) {
                continue;
            }
            step.pushed_down = Some(match step.pushed_down.take() {
                Some(existing) => existing & combined.clone(),
                None => combined.clone(),
            });
            changed = true;
        }

        // A purely denormalized search still gets one partitioned step so
        // the key-set scan is bounded before the final statement runs.
        if plan.steps.is_empty() {
            let mut step = TableStep::marker(StepKind::HoistedDenormalized, SearchTable::Resource);
            step.pushed_down = Some(combined);
            plan.steps.push(step);
            changed = true;
        }

        if changed {
            Ok(PassOutcome::changed(plan))
        } else {
            Ok(PassOutcome::unchanged(plan))
        }
    }
}

/// Only type and surrogate columns exist on the search tables.
fn is_pushable(expr: &Expression) -> bool {
    match expr {
        Expression::Binary { field, .. } => pushable_field(*field),
        Expression::In { field, .. } => pushable_field(*field),
        Expression::Multiary {
            op: MultiaryOp::And,
            children,
        } => children.iter().all(is_pushable),
        // Disjunctions over pushable columns are pushable as a unit.
        Expression::Multiary {
            op: MultiaryOp::Or,
            children,
        } => children.iter().all(is_pushable),
        _ => false,
    }
}

const fn pushable_field(field: Field) -> bool {
    matches!(field, Field::ResourceTypeId | Field::ResourceSurrogateId)
}

fn accepts_pushdown(step: &TableStep) -> bool {
    // Chain targets and include outputs are different resources than the
    // ones the predicates restrict.
    if step.chain_level > 0 || step.is_include_kind() {
        return false;
    }
    matches!(
        step.kind,
        StepKind::Normal
            | StepKind::All
            | StepKind::Concatenation
            | StepKind::HoistedDenormalized
            | StepKind::Chain
    )
}

fn conjoin_all(mut predicates: Vec<Expression>) -> Expression {
    if predicates.len() == 1 {
        predicates.remove(0)
    } else {
        Expression::and(predicates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compile::context::CompileOptions,
        cursor::ContinuationSignature,
        schema::{
            ResourceTypeId, ResourceTypeMap, SchemaModel, SchemaVersion,
            search_param::{SearchParamDef, SearchParamType},
        },
    };
    use std::sync::Arc;

    fn schema(version: SchemaVersion) -> SchemaModel {
        SchemaModel::new(ResourceTypeMap::new(["Patient", "Observation"]), version)
    }

    fn ctx(schema: &SchemaModel) -> CompileContext<'_> {
        let shape = Expression::eq(Field::TokenCode, "x").shape_hash();
        CompileContext::new(
            schema,
            CompileOptions::default(),
            None,
            ContinuationSignature::compute(shape, schema.version),
        )
    }

    fn plan_with_step() -> QueryPlan {
        let param = Arc::new(SearchParamDef::new(
            "http://example.org/SearchParameter/code",
            "code",
            SearchParamType::Token,
        ));
        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.resource_predicates = vec![Expression::eq(
            Field::ResourceTypeId,
            ResourceTypeId(1),
        )];
        plan.steps.push(TableStep::normal(
            SearchTable::Token,
            param,
            Some(Expression::eq(Field::TokenCode, "final")),
        ));
        plan
    }

    #[test]
    fn type_restriction_is_copied_into_steps() {
        let schema = schema(SchemaVersion::LATEST);
        let ctx = ctx(&schema);

        let plan = Pushdown.apply(plan_with_step(), &ctx).unwrap().plan;

        assert_eq!(
            plan.steps[0].pushed_down,
            Some(Expression::eq(Field::ResourceTypeId, ResourceTypeId(1)))
        );
        // Original stays behind for the final statement.
        assert_eq!(plan.resource_predicates.len(), 1);
    }

    #[test]
    fn unpartitioned_schema_skips_the_pass() {
        let schema = schema(SchemaVersion(26));
        let ctx = ctx(&schema);

        let outcome = Pushdown.apply(plan_with_step(), &ctx).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.plan.steps[0].pushed_down, None);
    }

    #[test]
    fn denormalized_only_search_gains_a_hoisted_step() {
        let schema = schema(SchemaVersion::LATEST);
        let ctx = ctx(&schema);

        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.resource_predicates = vec![Expression::eq(
            Field::ResourceTypeId,
            ResourceTypeId(0),
        )];

        let plan = Pushdown.apply(plan, &ctx).unwrap().plan;

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].kind, StepKind::HoistedDenormalized);
        assert!(plan.steps[0].pushed_down.is_some());
    }
}
