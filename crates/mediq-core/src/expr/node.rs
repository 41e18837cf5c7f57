use crate::{
    expr::ops::{BinaryOp, Field, MultiaryOp, SortOrder, StringMatch, Value},
    schema::{search_param::SearchParamDef, types::ResourceTypeId},
    surrogate::SurrogateId,
};
use std::{
    ops::{BitAnd, BitOr},
    sync::Arc,
};

///
/// Expression
///
/// Pure, database-agnostic representation of a search query. This layer
/// contains no physical-schema knowledge; all specialization occurs in the
/// rewrite pipeline:
///
/// - root partitioning
/// - physical-column rewrites (dates, numerics, strings, `_lastUpdated`)
/// - partition elimination and continuation narrowing
/// - join/include planning
///
/// Trees are immutable: every rewrite returns a new (sub)tree.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Expression {
    /// Scopes `inner` to the storage rows of one search parameter.
    SearchParameter {
        param: Arc<SearchParamDef>,
        inner: Box<Expression>,
    },

    /// Column comparison. `component` indexes into the owning composite
    /// parameter's component list, when present.
    Binary {
        field: Field,
        op: BinaryOp,
        value: Value,
        component: Option<usize>,
    },

    /// String column match.
    StringOp {
        op: StringMatch,
        field: Field,
        value: String,
        ignore_case: bool,
        component: Option<usize>,
    },

    /// N-ary conjunction or disjunction.
    Multiary {
        op: MultiaryOp,
        children: Vec<Expression>,
    },

    Not(Box<Expression>),

    /// Filters resources by a predicate over resources they reference
    /// (`reversed = false`) or that reference them (`reversed = true`).
    Chained {
        param: Arc<SearchParamDef>,
        source_types: Vec<ResourceTypeId>,
        target_types: Vec<ResourceTypeId>,
        reversed: bool,
        inner: Box<Expression>,
    },

    /// Compartment membership restriction.
    Compartment { kind: String, id: String },

    /// `:missing=` modifier on a whole search parameter.
    MissingSearchParameter {
        param: Arc<SearchParamDef>,
        is_missing: bool,
    },

    /// A row lacking a value for one physical column.
    MissingField { field: Field },

    /// `_include` / `_revinclude` directive.
    Include(IncludeSpec),

    /// `_sort` directive.
    Sort {
        param: Arc<SearchParamDef>,
        order: SortOrder,
    },

    /// Set membership over one column.
    In { field: Field, values: Vec<Value> },

    /// Disjoint branch union; branches are individually complete.
    UnionAll { children: Vec<Expression> },

    /// Pre-resolved surrogate-id list. Opaque to every rewrite pass.
    TrustedIdList { ids: Vec<SurrogateId> },
}

///
/// IncludeSpec
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IncludeSpec {
    pub param: Arc<SearchParamDef>,
    pub source_types: Vec<ResourceTypeId>,
    pub target_types: Vec<ResourceTypeId>,
    pub iterate: bool,
    pub reversed: bool,
}

impl IncludeSpec {
    /// Resource types this include emits into the result set.
    #[must_use]
    pub fn produced_types(&self) -> &[ResourceTypeId] {
        if self.reversed {
            &self.source_types
        } else {
            &self.target_types
        }
    }

    /// Resource types that must already be in the result set for this
    /// include to match anything.
    #[must_use]
    pub fn required_types(&self) -> &[ResourceTypeId] {
        if self.reversed {
            &self.target_types
        } else {
            &self.source_types
        }
    }
}

///
/// ChainSpec
///
/// Reference-traversal metadata a flattened chain step carries.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainSpec {
    pub param: Arc<SearchParamDef>,
    pub source_types: Vec<ResourceTypeId>,
    pub target_types: Vec<ResourceTypeId>,
    pub reversed: bool,
}

impl Expression {
    #[must_use]
    pub const fn and(children: Vec<Self>) -> Self {
        Self::Multiary {
            op: MultiaryOp::And,
            children,
        }
    }

    #[must_use]
    pub const fn or(children: Vec<Self>) -> Self {
        Self::Multiary {
            op: MultiaryOp::Or,
            children,
        }
    }

    #[expect(clippy::should_implement_trait)]
    #[must_use]
    pub fn not(inner: Self) -> Self {
        Self::Not(Box::new(inner))
    }

    #[must_use]
    pub fn param(param: Arc<SearchParamDef>, inner: Self) -> Self {
        Self::SearchParameter {
            param,
            inner: Box::new(inner),
        }
    }

    #[must_use]
    pub fn binary(field: Field, op: BinaryOp, value: impl Into<Value>) -> Self {
        Self::Binary {
            field,
            op,
            value: value.into(),
            component: None,
        }
    }

    #[must_use]
    pub fn eq(field: Field, value: impl Into<Value>) -> Self {
        Self::binary(field, BinaryOp::Eq, value)
    }

    #[must_use]
    pub fn string(op: StringMatch, field: Field, value: impl Into<String>) -> Self {
        Self::StringOp {
            op,
            field,
            value: value.into(),
            ignore_case: false,
            component: None,
        }
    }

    #[must_use]
    pub fn in_set(field: Field, values: Vec<Value>) -> Self {
        Self::In { field, values }
    }

    /// True when this node addresses only base resource-table columns, so
    /// it can be answered without a search-table join.
    #[must_use]
    pub fn is_resource_only(&self) -> bool {
        match self {
            Self::Binary { field, .. } | Self::MissingField { field } => field.is_resource_column(),
            Self::StringOp { field, .. } => field.is_resource_column(),
            Self::In { field, .. } => field.is_resource_column(),
            Self::Multiary { children, .. } | Self::UnionAll { children } => {
                children.iter().all(Self::is_resource_only)
            }
            Self::Not(inner) => inner.is_resource_only(),
            Self::TrustedIdList { .. } => true,
            Self::SearchParameter { .. }
            | Self::Chained { .. }
            | Self::Compartment { .. }
            | Self::MissingSearchParameter { .. }
            | Self::Include(_)
            | Self::Sort { .. } => false,
        }
    }

    /// Variant name for diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::SearchParameter { .. } => "SearchParameter",
            Self::Binary { .. } => "Binary",
            Self::StringOp { .. } => "StringOp",
            Self::Multiary { .. } => "Multiary",
            Self::Not(_) => "Not",
            Self::Chained { .. } => "Chained",
            Self::Compartment { .. } => "Compartment",
            Self::MissingSearchParameter { .. } => "MissingSearchParameter",
            Self::MissingField { .. } => "MissingField",
            Self::Include(_) => "Include",
            Self::Sort { .. } => "Sort",
            Self::In { .. } => "In",
            Self::UnionAll { .. } => "UnionAll",
            Self::TrustedIdList { .. } => "TrustedIdList",
        }
    }
}

impl BitAnd for Expression {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self::and(vec![self, rhs])
    }
}

impl BitOr for Expression {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self::or(vec![self, rhs])
    }
}
