//! Partition elimination and continuation narrowing.
//!
//! Resource-type predicates are folded into a bitset of reachable
//! partitions. A continuation token narrows the set further: partitions
//! that sort before the resume position cannot contribute rows to this or
//! any later page. An empty set is a valid empty-result plan, never an
//! error.
//!
//! Narrowing only applies to surrogate-ordered pagination; sorted searches
//! resume through the sort controller instead.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::QueryPlan,
        rewrite::{PassOutcome, RewritePass},
    },
    expr::{BinaryOp, Expression, Field, MultiaryOp, SortOrder, Value},
    schema::{ResourceTypeId, types::ResourceTypeSet},
};

pub struct PartitionPrune;

impl RewritePass for PartitionPrune {
    fn name(&self) -> &'static str {
        "partition_prune"
    }

    fn apply(
        &self,
        mut plan: QueryPlan,
        ctx: &CompileContext<'_>,
    ) -> Result<PassOutcome, CompileError> {
        let mut allowed = ctx.schema.types.all_types();

        for predicate in &plan.resource_predicates {
            if let Some(restriction) = restriction(predicate, ctx)? {
                allowed = allowed.intersect(&restriction);
            }
        }

        if let Some(token) = &ctx.token
            && token.sort.is_none()
        {
            let descending = surrogate_order(&plan).is_descending();
            if descending {
                allowed.retain_at_most(token.resource_type_id);
            } else {
                allowed.retain_at_least(token.resource_type_id);
            }

            if !allowed.is_empty() {
                plan.resource_predicates
                    .push(resume_predicate(&allowed, token, descending));
            }
        }

        if allowed.is_empty() {
            plan.yields_no_rows = true;
        }
        plan.allowed_types = Some(allowed);

        Ok(PassOutcome::changed(plan))
    }
}

/// Pagination order of an unsorted (surrogate-ordered) search. A sort on
/// `_lastUpdated` is surrogate order too, possibly reversed.
fn surrogate_order(plan: &QueryPlan) -> SortOrder {
    match &plan.sort {
        Some(sort) if sort.param.code == crate::schema::param_codes::LAST_UPDATED => sort.order,
        _ => SortOrder::Ascending,
    }
}

/// Keyset predicate resuming after the token position.
fn resume_predicate(
    allowed: &ResourceTypeSet,
    token: &crate::cursor::ContinuationToken,
    descending: bool,
) -> Expression {
    let cmp = if descending { BinaryOp::Lt } else { BinaryOp::Gt };

    // Within a single partition the type bound is vacuous and the resume
    // collapses to a plain surrogate comparison.
    if allowed.as_single() == Some(token.resource_type_id) {
        return Expression::binary(Field::ResourceSurrogateId, cmp, token.surrogate_id);
    }

    Expression::binary(Field::ResourceTypeId, cmp, token.resource_type_id)
        | (Expression::eq(Field::ResourceTypeId, token.resource_type_id)
            & Expression::binary(Field::ResourceSurrogateId, cmp, token.surrogate_id))
}

/// Partition restriction implied by one predicate. `None` means the
/// predicate does not restrict the partition set.
fn restriction(
    expr: &Expression,
    ctx: &CompileContext<'_>,
) -> Result<Option<ResourceTypeSet>, CompileError> {
    match expr {
        Expression::Binary {
            field: Field::ResourceTypeId,
            op: BinaryOp::Eq,
            value,
            component: None,
        } => Ok(Some(ResourceTypeSet::single(resolve(value, ctx)?))),

        Expression::In {
            field: Field::ResourceTypeId,
            values,
        } => {
            let mut set = ResourceTypeSet::new();
            for value in values {
                set.insert(resolve(value, ctx)?);
            }
            Ok(Some(set))
        }

        Expression::Multiary {
            op: MultiaryOp::And,
            children,
        } => {
            let mut acc: Option<ResourceTypeSet> = None;
            for child in children {
                if let Some(r) = restriction(child, ctx)? {
                    acc = Some(match acc {
                        Some(a) => a.intersect(&r),
                        None => r,
                    });
                }
            }
            Ok(acc)
        }

        Expression::Multiary {
            op: MultiaryOp::Or,
            children,
        }
        | Expression::UnionAll { children } => {
            let mut acc = ResourceTypeSet::new();
            for child in children {
                match restriction(child, ctx)? {
                    // One unrestricted branch makes the whole disjunction
                    // unrestricted.
                    None => return Ok(None),
                    Some(r) => acc = acc.union(&r),
                }
            }
            Ok(Some(acc))
        }

        _ => Ok(None),
    }
}

fn resolve(value: &Value, ctx: &CompileContext<'_>) -> Result<ResourceTypeId, CompileError> {
    match value {
        Value::TypeId(id) => Ok(*id),
        Value::Text(name) => {
            ctx.schema
                .types
                .id_of(name)
                .ok_or_else(|| CompileError::UnknownResourceType { name: name.clone() })
        }
        other => Err(crate::error::InternalError::rewrite_invariant(format!(
            "resource type compared to non-type value tag {}",
            other.kind_tag()
        ))
        .into()),
    }
}
