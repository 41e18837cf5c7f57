//! Include planning: ordering `_include`/`_revinclude` expansion steps and
//! rejecting cyclic iterate chains.
//!
//! Non-iterating includes read only the match set and keep their request
//! order. Iterating includes may consume each other's output, so they are
//! topologically ordered by produced/required resource types; a cycle in
//! that graph is a client error reported with the parameter path.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::{QueryPlan, StepKind, TableStep},
        rewrite::{PassOutcome, RewritePass},
        table::SearchTable,
    },
    expr::IncludeSpec,
};
use std::collections::HashMap;

pub struct IncludePlanner;

impl RewritePass for IncludePlanner {
    fn name(&self) -> &'static str {
        "include_planner"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let mut includes = Vec::new();
        let mut steps = Vec::with_capacity(plan.steps.len());
        for step in plan.steps {
            if step.kind == StepKind::Include {
                if let Some(spec) = step.include {
                    includes.push(spec);
                }
            } else {
                steps.push(step);
            }
        }
        plan.steps = steps;

        if includes.is_empty() {
            return Ok(PassOutcome::unchanged(plan));
        }
        if includes.len() > ctx.options.max_includes {
            return Err(CompileError::TooManyIncludes {
                count: includes.len(),
                max: ctx.options.max_includes,
            });
        }

        // Includes need a match set to expand from.
        if plan.steps.is_empty() {
            plan.steps.push(TableStep::all());
        }

        let (plain, iterate): (Vec<IncludeSpec>, Vec<IncludeSpec>) =
            includes.into_iter().partition(|spec| !spec.iterate);

        for spec in plain {
            plan.steps.push(TableStep::include(spec));
        }
        for spec in order_iterates(iterate)? {
            plan.steps.push(TableStep::include(spec));
        }

        if ctx.options.include_count_limit.is_some() {
            plan.steps
                .push(TableStep::marker(StepKind::IncludeLimit, SearchTable::Resource));
        }
        plan.steps.push(TableStep::marker(
            StepKind::IncludeUnionAll,
            SearchTable::Resource,
        ));

        Ok(PassOutcome::changed(plan))
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum NodeState {
    Unvisited,
    Visiting,
    Done,
}

/// Depth-first topological order over the produces/requires graph.
fn order_iterates(specs: Vec<IncludeSpec>) -> Result<Vec<IncludeSpec>, CompileError> {
    let mut states: HashMap<usize, NodeState> =
        (0..specs.len()).map(|i| (i, NodeState::Unvisited)).collect();
    let mut order = Vec::with_capacity(specs.len());

    for start in 0..specs.len() {
        visit(start, &specs, &mut states, &mut order, &mut Vec::new())?;
    }

    Ok(order.into_iter().map(|i| specs[i].clone()).collect())
}

fn visit(
    node: usize,
    specs: &[IncludeSpec],
    states: &mut HashMap<usize, NodeState>,
    order: &mut Vec<usize>,
    stack: &mut Vec<usize>,
) -> Result<(), CompileError> {
    match states[&node] {
        NodeState::Done => return Ok(()),
        NodeState::Visiting => {
            let mut path: Vec<String> = stack
                .iter()
                .skip_while(|i| **i != node)
                .map(|i| specs[*i].param.code.clone())
                .collect();
            path.push(specs[node].param.code.clone());
            return Err(CompileError::IncludeCycle { path });
        }
        NodeState::Unvisited => {}
    }

    states.insert(node, NodeState::Visiting);
    stack.push(node);

    // Feeders first: anything producing a type this include consumes.
    for (i, other) in specs.iter().enumerate() {
        if i != node && feeds(other, &specs[node]) {
            visit(i, specs, states, order, stack)?;
        }
    }

    stack.pop();
    states.insert(node, NodeState::Done);
    order.push(node);
    Ok(())
}

fn feeds(producer: &IncludeSpec, consumer: &IncludeSpec) -> bool {
    producer
        .produced_types()
        .iter()
        .any(|t| consumer.required_types().contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compile::context::CompileOptions,
        cursor::ContinuationSignature,
        expr::{Expression, Field},
        schema::{
            ResourceTypeId, ResourceTypeMap, SchemaModel, SchemaVersion,
            search_param::{SearchParamDef, SearchParamType},
        },
    };
    use std::sync::Arc;

    fn schema() -> SchemaModel {
        SchemaModel::new(
            ResourceTypeMap::new(["Patient", "Observation", "Organization", "Encounter"]),
            SchemaVersion::LATEST,
        )
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

    fn include(
        code: &str,
        source: u16,
        target: u16,
        iterate: bool,
    ) -> IncludeSpec {
        IncludeSpec {
            param: Arc::new(SearchParamDef::new(
                format!("http://example.org/SearchParameter/{code}"),
                code,
                SearchParamType::Reference,
            )),
            source_types: vec![ResourceTypeId(source)],
            target_types: vec![ResourceTypeId(target)],
            iterate,
            reversed: false,
        }
    }

    fn plan_with_includes(includes: Vec<IncludeSpec>) -> QueryPlan {
        let mut plan = QueryPlan::new(Expression::eq(Field::TokenCode, "x").shape_hash());
        for spec in includes {
            plan.steps.push(TableStep::include(spec));
        }
        plan
    }

    #[test]
    fn iterate_includes_order_feeders_first() {
        let schema = schema();
        let ctx = ctx(&schema);

        // organization consumes Patient rows produced by subject.
        let plan = plan_with_includes(vec![
            include("organization", 0, 2, true),
            include("subject", 1, 0, true),
        ]);
        let plan = IncludePlanner.apply(plan, &ctx).unwrap().plan;

        let codes: Vec<&str> = plan
            .steps
            .iter()
            .filter(|s| s.kind == StepKind::Include)
            .filter_map(|s| s.param.as_deref().map(|p| p.code.as_str()))
            .collect();
        assert_eq!(codes, vec!["subject", "organization"]);
    }

    #[test]
    fn cycle_is_reported_with_the_parameter_path() {
        let schema = schema();
        let ctx = ctx(&schema);

        // 0 -> 1 -> 0 through two iterate includes.
        let plan = plan_with_includes(vec![
            include("a", 0, 1, true),
            include("b", 1, 0, true),
        ]);

        let Err(CompileError::IncludeCycle { path }) = IncludePlanner.apply(plan, &ctx) else {
            panic!("expected an include cycle");
        };
        assert_eq!(path.first(), path.last());
        assert!(path.len() >= 3);
    }

    #[test]
    fn include_count_is_bounded() {
        let schema = schema();
        let mut options = CompileOptions::default();
        options.max_includes = 1;
        let shape = Expression::eq(Field::TokenCode, "x").shape_hash();
        let ctx = CompileContext::new(
            &schema,
            options,
            None,
            ContinuationSignature::compute(shape, schema.version),
        );

        let plan = plan_with_includes(vec![
            include("a", 0, 1, false),
            include("b", 1, 2, false),
        ]);

        assert!(matches!(
            IncludePlanner.apply(plan, &ctx),
            Err(CompileError::TooManyIncludes { count: 2, max: 1 })
        ));
    }

    #[test]
    fn markers_and_seed_are_appended() {
        let schema = schema();
        let ctx = ctx(&schema);

        let plan = plan_with_includes(vec![include("subject", 1, 0, false)]);
        let plan = IncludePlanner.apply(plan, &ctx).unwrap().plan;

        assert_eq!(plan.steps[0].kind, StepKind::All, "seed for a bare include");
        assert_eq!(plan.steps[1].kind, StepKind::Include);
        assert_eq!(plan.steps[2].kind, StepKind::IncludeLimit);
        assert_eq!(plan.steps[3].kind, StepKind::IncludeUnionAll);
    }
}
