//! Reference typing: an untyped reference value against a parameter with a
//! single target type gains the explicit type restriction.
//!
//! Without it the reference-table seek matches ids across every target
//! partition; with a sole possible target the restriction is free.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::{QueryPlan, StepKind},
        rewrite::{PassOutcome, RewritePass},
    },
    expr::{Expression, Field},
};

pub struct UntypedReference;

impl RewritePass for UntypedReference {
    fn name(&self) -> &'static str {
        "untyped_reference"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        _ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let mut changed = false;

        for step in &mut plan.steps {
            if step.kind != StepKind::Normal {
                continue;
            }
            let Some(param) = &step.param else { continue };
            if !param.is_reference() || param.target_types.len() != 1 {
                continue;
            }
            let Some(predicate) = &step.predicate else {
                continue;
            };

            if mentions(predicate, Field::ReferenceResourceId)
                && !mentions(predicate, Field::ReferenceResourceTypeId)
            {
                let target = param.target_types[0];
                step.conjoin(Expression::eq(Field::ReferenceResourceTypeId, target));
                changed = true;
            }
        }

        if changed {
            Ok(PassOutcome::changed(plan))
        } else {
            Ok(PassOutcome::unchanged(plan))
        }
    }
}

fn mentions(expr: &Expression, field: Field) -> bool {
    match expr {
        Expression::Binary { field: f, .. } | Expression::MissingField { field: f } => *f == field,
        Expression::StringOp { field: f, .. } => *f == field,
        Expression::In { field: f, .. } => *f == field,
        Expression::Multiary { children, .. } | Expression::UnionAll { children } => {
            children.iter().any(|c| mentions(c, field))
        }
        Expression::Not(inner) => mentions(inner, field),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compile::{context::CompileOptions, plan::TableStep, table::SearchTable},
        cursor::ContinuationSignature,
        schema::{
            ResourceTypeId, ResourceTypeMap, SchemaModel, SchemaVersion,
            search_param::{SearchParamDef, SearchParamType},
        },
    };
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

    fn subject(targets: Vec<ResourceTypeId>) -> Arc<SearchParamDef> {
        Arc::new(
            SearchParamDef::new(
                "http://example.org/SearchParameter/subject",
                "subject",
                SearchParamType::Reference,
            )
            .with_targets(targets),
        )
    }

    #[test]
    fn sole_target_type_is_made_explicit() {
        let schema = SchemaModel::new(
            ResourceTypeMap::new(["Patient", "Observation"]),
            SchemaVersion::LATEST,
        );
        let ctx = ctx(&schema);

        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.steps.push(TableStep::normal(
            SearchTable::Reference,
            subject(vec![ResourceTypeId(0)]),
            Some(Expression::eq(Field::ReferenceResourceId, "p1")),
        ));

        let plan = UntypedReference.apply(plan, &ctx).unwrap().plan;

        assert_eq!(
            plan.steps[0].predicate,
            Some(
                Expression::eq(Field::ReferenceResourceId, "p1")
                    & Expression::eq(Field::ReferenceResourceTypeId, ResourceTypeId(0))
            )
        );
    }

    #[test]
    fn already_typed_reference_is_untouched() {
        let schema = SchemaModel::new(
            ResourceTypeMap::new(["Patient", "Observation"]),
            SchemaVersion::LATEST,
        );
        let ctx = ctx(&schema);

        let predicate = Expression::eq(Field::ReferenceResourceId, "p1")
            & Expression::eq(Field::ReferenceResourceTypeId, ResourceTypeId(0));
        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.steps.push(TableStep::normal(
            SearchTable::Reference,
            subject(vec![ResourceTypeId(0)]),
            Some(predicate.clone()),
        ));

        let outcome = UntypedReference.apply(plan, &ctx).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.plan.steps[0].predicate, Some(predicate));
    }

    #[test]
    fn multiple_targets_stay_untyped() {
        let schema = SchemaModel::new(
            ResourceTypeMap::new(["Patient", "Observation"]),
            SchemaVersion::LATEST,
        );
        let ctx = ctx(&schema);

        let predicate = Expression::eq(Field::ReferenceResourceId, "p1");
        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        plan.steps.push(TableStep::normal(
            SearchTable::Reference,
            subject(vec![ResourceTypeId(0), ResourceTypeId(1)]),
            Some(predicate.clone()),
        ));

        let outcome = UntypedReference.apply(plan, &ctx).unwrap();
        assert!(!outcome.changed);
    }
}
