//! Value-erased query-shape hashing.
//!
//! Two trees share a shape hash when they have the same structure,
//! operators, fields, and parameters; literal values are erased, and
//! children of commutative nodes combine order-insensitively. The hash keys
//! the partition-statistics cache and anchors the continuation signature.

use crate::expr::{Expression, node::IncludeSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

///
/// QueryShapeHash
///

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct QueryShapeHash(u64);

impl QueryShapeHash {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryShapeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Expression {
    /// Compute the value-erased shape hash of this tree.
    #[must_use]
    pub fn shape_hash(&self) -> QueryShapeHash {
        QueryShapeHash(shape_of(self))
    }
}

// Variant tags. Stable across releases; never reuse a retired tag.
const TAG_SEARCH_PARAMETER: u8 = 0x01;
const TAG_BINARY: u8 = 0x02;
const TAG_STRING_OP: u8 = 0x03;
const TAG_MULTIARY: u8 = 0x04;
const TAG_NOT: u8 = 0x05;
const TAG_CHAINED: u8 = 0x06;
const TAG_COMPARTMENT: u8 = 0x07;
const TAG_MISSING_PARAM: u8 = 0x08;
const TAG_MISSING_FIELD: u8 = 0x09;
const TAG_INCLUDE: u8 = 0x0a;
const TAG_SORT: u8 = 0x0b;
const TAG_IN: u8 = 0x0c;
const TAG_UNION_ALL: u8 = 0x0d;
const TAG_TRUSTED_IDS: u8 = 0x0e;

fn shape_of(expr: &Expression) -> u64 {
    match expr {
        Expression::SearchParameter { param, inner } => {
            combine(TAG_SEARCH_PARAMETER, param.url.as_bytes(), &[shape_of(inner)])
        }
        Expression::Binary {
            field,
            op,
            value,
            component,
        } => combine(
            TAG_BINARY,
            &[
                field.tag(),
                op.tag(),
                value.kind_tag(),
                component_tag(*component),
            ],
            &[],
        ),
        Expression::StringOp {
            op,
            field,
            ignore_case,
            component,
            ..
        } => combine(
            TAG_STRING_OP,
            &[
                op.tag(),
                field.tag(),
                u8::from(*ignore_case),
                component_tag(*component),
            ],
            &[],
        ),
        Expression::Multiary { op, children } => {
            combine(TAG_MULTIARY, &[op.tag()], &[unordered(children)])
        }
        Expression::Not(inner) => combine(TAG_NOT, &[], &[shape_of(inner)]),
        Expression::Chained {
            param,
            reversed,
            inner,
            ..
        } => combine(
            TAG_CHAINED,
            param.url.as_bytes(),
            &[u64::from(*reversed), shape_of(inner)],
        ),
        Expression::Compartment { kind, .. } => combine(TAG_COMPARTMENT, kind.as_bytes(), &[]),
        Expression::MissingSearchParameter { param, is_missing } => combine(
            TAG_MISSING_PARAM,
            param.url.as_bytes(),
            &[u64::from(*is_missing)],
        ),
        Expression::MissingField { field } => combine(TAG_MISSING_FIELD, &[field.tag()], &[]),
        Expression::Include(spec) => include_shape(spec),
        Expression::Sort { param, order } => combine(
            TAG_SORT,
            param.url.as_bytes(),
            &[u64::from(order.is_descending())],
        ),
        // `In` erases both the values and their count: `a IN (1,2)` and
        // `a IN (1,2,3)` are the same query shape.
        Expression::In { field, .. } => combine(TAG_IN, &[field.tag()], &[]),
        Expression::UnionAll { children } => combine(TAG_UNION_ALL, &[], &[unordered(children)]),
        Expression::TrustedIdList { .. } => combine(TAG_TRUSTED_IDS, &[], &[]),
    }
}

fn include_shape(spec: &IncludeSpec) -> u64 {
    combine(
        TAG_INCLUDE,
        spec.param.url.as_bytes(),
        &[u64::from(spec.iterate), u64::from(spec.reversed)],
    )
}

// Order-insensitive combination: wrapping sum commutes, so permuted
// children of And/Or/UnionAll hash identically.
fn unordered(children: &[Expression]) -> u64 {
    children
        .iter()
        .map(shape_of)
        .fold(0u64, u64::wrapping_add)
}

fn combine(tag: u8, bytes: &[u8], parts: &[u64]) -> u64 {
    let mut buf = Vec::with_capacity(1 + bytes.len() + parts.len() * 8);
    buf.push(tag);
    buf.extend_from_slice(bytes);
    for part in parts {
        buf.extend_from_slice(&part.to_le_bytes());
    }
    xxh3_64(&buf)
}

const fn component_tag(component: Option<usize>) -> u8 {
    match component {
        // Offset so "no component" and "component 0" stay distinct.
        Some(i) => (i as u8).wrapping_add(1),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expr::ops::{Field, Value},
        schema::search_param::{SearchParamDef, SearchParamType},
    };
    use std::sync::Arc;

    fn param(code: &str) -> Arc<SearchParamDef> {
        Arc::new(SearchParamDef::new(
            format!("http://example.org/SearchParameter/{code}"),
            code,
            SearchParamType::Token,
        ))
    }

    #[test]
    fn literal_values_are_erased() {
        let a = Expression::eq(Field::TokenCode, "glucose");
        let b = Expression::eq(Field::TokenCode, "potassium");

        assert_eq!(a.shape_hash(), b.shape_hash());
    }

    #[test]
    fn operators_are_not_erased() {
        let eq = Expression::eq(Field::TokenCode, "a");
        let ne = Expression::binary(Field::TokenCode, crate::expr::BinaryOp::Ne, "a");

        assert_ne!(eq.shape_hash(), ne.shape_hash());
    }

    #[test]
    fn commutative_children_hash_order_insensitively() {
        let x = Expression::param(param("code"), Expression::eq(Field::TokenCode, "x"));
        let y = Expression::param(param("status"), Expression::eq(Field::TokenCode, "y"));

        let xy = Expression::and(vec![x.clone(), y.clone()]);
        let yx = Expression::and(vec![y, x]);

        assert_eq!(xy.shape_hash(), yx.shape_hash());
    }

    #[test]
    fn and_differs_from_or() {
        let x = Expression::eq(Field::TokenCode, "x");
        let y = Expression::eq(Field::TokenCode, "y");

        let and = Expression::and(vec![x.clone(), y.clone()]);
        let or = Expression::or(vec![x, y]);

        assert_ne!(and.shape_hash(), or.shape_hash());
    }

    #[test]
    fn in_value_count_is_erased() {
        let two = Expression::in_set(
            Field::ResourceTypeId,
            vec![Value::Int(1), Value::Int(2)],
        );
        let three = Expression::in_set(
            Field::ResourceTypeId,
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        );

        assert_eq!(two.shape_hash(), three.shape_hash());
    }
}
