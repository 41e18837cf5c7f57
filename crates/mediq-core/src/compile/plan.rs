use crate::{
    expr::{Expression, QueryShapeHash, SortOrder, node::ChainSpec, node::IncludeSpec},
    schema::{search_param::SearchParamDef, types::ResourceTypeSet},
    surrogate::SurrogateId,
    compile::table::SearchTable,
};
use std::fmt::Write as _;
use std::sync::Arc;

///
/// QueryPlan
///
/// The compiled form of a search expression, produced by root partitioning
/// and reshaped by every subsequent pass until the code generator walks it.
///
/// Invariants:
/// - Step order encodes a dependency chain: step *n* (n > 1) is implicitly
///   restricted to the surrogate-key set produced by step *n−1*. A pass
///   that reorders steps must preserve this property or re-seed the chain
///   with an `All` step.
/// - `resource_predicates` are answerable from the base resource table
///   alone and are applied inline in the final statement.
/// - Once `yields_no_rows` is set the plan is a valid empty-result plan,
///   distinct from any error condition.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryPlan {
    /// Denormalized conditions applied in the final statement.
    pub resource_predicates: Vec<Expression>,

    /// Ordered table-plan steps; each becomes one CTE.
    pub steps: Vec<TableStep>,

    /// Sort directive extracted at root partitioning; phase resolved by the
    /// sort/pagination controller.
    pub sort: Option<SortState>,

    /// Resource types this query may touch. `None` until the partition
    /// analysis has run; `Some` afterwards, even when unrestricted.
    pub allowed_types: Option<ResourceTypeSet>,

    /// Set when partition analysis proves the result set is empty.
    pub yields_no_rows: bool,

    /// Shape hash of the source expression.
    pub shape: QueryShapeHash,
}

impl QueryPlan {
    #[must_use]
    pub fn new(shape: QueryShapeHash) -> Self {
        Self {
            resource_predicates: Vec::new(),
            steps: Vec::new(),
            sort: None,
            allowed_types: None,
            yields_no_rows: false,
            shape,
        }
    }

    /// Number of physical partitions (resource types) the plan can touch,
    /// given the total type count as the unrestricted fallback.
    #[must_use]
    pub fn partition_count(&self, total_types: usize) -> usize {
        if self.yields_no_rows {
            return 0;
        }
        self.allowed_types
            .as_ref()
            .map_or(total_types, ResourceTypeSet::len)
    }

    /// Stable, human-readable step listing for diagnostics and tests.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if self.yields_no_rows {
            out.push_str("(empty result)\n");
        }
        for (i, step) in self.steps.iter().enumerate() {
            let param = step
                .param
                .as_ref()
                .map_or("-", |p| p.code.as_str());
            let _ = writeln!(
                out,
                "{:>2}: {:?} param={param} chain_level={}",
                i + 1,
                step.kind,
                step.chain_level
            );
        }
        if let Some(sort) = &self.sort {
            let _ = writeln!(
                out,
                "sort: {} {:?} phase={:?}",
                sort.param.code, sort.order, sort.phase
            );
        }
        out
    }
}

///
/// StepKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepKind {
    /// Plain search-table filter.
    Normal,
    /// Reference-traversal join step.
    Chain,
    /// Subtraction step: rows of the previous step lacking a match.
    NotExists,
    /// `_include`/`_revinclude` expansion step.
    Include,
    /// Union of the match set with all include steps.
    IncludeUnionAll,
    /// Bound on total included rows.
    IncludeLimit,
    /// Sort-table step (missing- or present-value phase).
    Sort,
    /// Sort-table step when the sort field is already filtered on.
    SortWithFilter,
    /// Row-count bound applied in sort order.
    Top,
    /// Seed step selecting every candidate resource row.
    All,
    /// Resource-column-only predicate hoisted into its own step.
    HoistedDenormalized,
    /// Step whose predicate is a union of individually complete branches.
    Concatenation,
}

///
/// TableStep
///
/// One unit of the compiled plan: a filter against a specific physical
/// table, restricted to the key set of the preceding step.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableStep {
    pub kind: StepKind,
    pub table: SearchTable,
    pub param: Option<Arc<SearchParamDef>>,
    /// Predicate over this step's table columns.
    pub predicate: Option<Expression>,
    /// Resource-column predicate pushed down into this step.
    pub pushed_down: Option<Expression>,
    /// Reference-traversal depth; used for join aliasing.
    pub chain_level: u8,
    pub chain: Option<ChainSpec>,
    pub include: Option<IncludeSpec>,
}

impl TableStep {
    #[must_use]
    pub fn normal(
        table: SearchTable,
        param: Arc<SearchParamDef>,
        predicate: Option<Expression>,
    ) -> Self {
        Self {
            kind: StepKind::Normal,
            table,
            param: Some(param),
            predicate,
            pushed_down: None,
            chain_level: 0,
            chain: None,
            include: None,
        }
    }

    /// Seed step over the base resource table.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            kind: StepKind::All,
            table: SearchTable::Resource,
            param: None,
            predicate: None,
            pushed_down: None,
            chain_level: 0,
            chain: None,
            include: None,
        }
    }

    #[must_use]
    pub fn chain(spec: ChainSpec, chain_level: u8) -> Self {
        Self {
            kind: StepKind::Chain,
            table: SearchTable::Reference,
            param: Some(spec.param.clone()),
            predicate: None,
            pushed_down: None,
            chain_level,
            chain: Some(spec),
            include: None,
        }
    }

    #[must_use]
    pub fn include(spec: IncludeSpec) -> Self {
        Self {
            kind: StepKind::Include,
            table: SearchTable::Reference,
            param: Some(spec.param.clone()),
            predicate: None,
            pushed_down: None,
            chain_level: 0,
            chain: None,
            include: Some(spec),
        }
    }

    #[must_use]
    pub const fn marker(kind: StepKind, table: SearchTable) -> Self {
        Self {
            kind,
            table,
            param: None,
            predicate: None,
            pushed_down: None,
            chain_level: 0,
            chain: None,
            include: None,
        }
    }

    /// True for the include family of kinds.
    #[must_use]
    pub const fn is_include_kind(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Include | StepKind::IncludeUnionAll | StepKind::IncludeLimit
        )
    }

    /// Conjoin `extra` onto this step's predicate.
    pub fn conjoin(&mut self, extra: Expression) {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing & extra,
            None => extra,
        });
    }
}

///
/// SortPhase
///
/// Which side of the missing/present split the current page is on.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortPhase {
    /// Searching resources lacking a value for the sort field.
    MissingValues,
    /// Searching resources having a value for the sort field.
    PresentValues,
    /// The sort field is filtered on elsewhere; no split is needed.
    Filtered,
}

///
/// SortState
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortState {
    pub param: Arc<SearchParamDef>,
    pub order: SortOrder,
    /// Resolved by the sort/pagination controller; `None` beforehand.
    pub phase: Option<SortPhase>,
    /// Keyset resume bound on the surrogate id, when continuing a page.
    pub resume_surrogate: Option<SurrogateId>,
    /// Keyset resume bound on the sort value (present-value phase only).
    pub resume_value: Option<crate::expr::Value>,
}

impl SortState {
    #[must_use]
    pub const fn new(param: Arc<SearchParamDef>, order: SortOrder) -> Self {
        Self {
            param,
            order,
            phase: None,
            resume_surrogate: None,
            resume_value: None,
        }
    }
}
