//! Query compilation: expression trees in, parameterized SQL out.
//!
//! `SearchCompiler` owns the cross-request state (options and partition
//! statistics); everything per-request flows through a `CompileContext`.

pub mod context;
pub mod include;
pub mod plan;
pub mod rewrite;
pub mod sort;
pub mod table;

pub use context::{CompileContext, CompileOptions};
pub use plan::{QueryPlan, SortPhase, SortState, StepKind, TableStep};
pub use rewrite::{PassOutcome, PassReport, RewritePass};
pub use table::{CompositeTable, SearchTable, TableBinding};

use crate::{
    cursor::{ContinuationSignature, ContinuationToken, TokenError},
    error::InternalError,
    expr::{Expression, QueryShapeHash},
    schema::SchemaModel,
    sql::{self, SqlParameter},
    stats::PartitionStatsCache,
};
use thiserror::Error as ThisError;

///
/// CompileError
///
/// Everything a compilation can fail with. Client errors describe a bad
/// request; internal errors describe a pipeline bug.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum CompileError {
    #[error("include cycle: {}", path.join(" -> "))]
    IncludeCycle { path: Vec<String> },

    #[error("too many include directives: {count} (max {max})")]
    TooManyIncludes { count: usize, max: usize },

    #[error("unknown resource type: {name}")]
    UnknownResourceType { name: String },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl CompileError {
    /// True when the failure is the caller's fault and safe to surface.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::IncludeCycle { .. }
                | Self::TooManyIncludes { .. }
                | Self::UnknownResourceType { .. }
                | Self::Token(_)
        )
    }
}

///
/// CompiledQuery
///
/// The product of a successful compilation.
///

#[derive(Clone, Debug)]
pub struct CompiledQuery {
    pub sql: String,
    pub parameters: Vec<SqlParameter>,

    /// Shape hash of the source expression.
    pub shape: QueryShapeHash,

    /// Signature fresh continuation tokens for this query must carry.
    pub signature: ContinuationSignature,

    /// Partitions the query can touch after elimination.
    pub partition_count: usize,

    /// Pipeline diagnostics, one entry per pass in execution order.
    pub passes: Vec<PassReport>,
}

///
/// SearchCompiler
///

#[derive(Debug)]
pub struct SearchCompiler {
    options: CompileOptions,
    stats: PartitionStatsCache,
}

impl SearchCompiler {
    #[must_use]
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            stats: PartitionStatsCache::new(),
        }
    }

    #[must_use]
    pub const fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile one search expression against a schema, optionally resuming
    /// from an encoded continuation token.
    pub fn compile(
        &self,
        expr: &Expression,
        schema: &SchemaModel,
        token: Option<&str>,
    ) -> Result<CompiledQuery, CompileError> {
        let shape = expr.shape_hash();
        let signature = ContinuationSignature::compute(shape, schema.version);

        let token = token
            .map(|t| ContinuationToken::decode(t, signature))
            .transpose()?;
        let ctx = CompileContext::new(schema, self.options, token, signature);

        let plan = rewrite::root_split::split(expr.clone(), shape, &ctx)?;
        let (plan, passes) = rewrite::run_pipeline(plan, &ctx)?;
        let output = sql::emit(&plan, &ctx)?;

        let partition_count = plan.partition_count(schema.types.len());
        self.stats.observe(shape, partition_count);
        tracing::debug!(
            shape = %shape,
            partitions = partition_count,
            steps = plan.steps.len(),
            "query compiled"
        );

        Ok(CompiledQuery {
            sql: output.sql,
            parameters: output.parameters,
            shape,
            signature,
            partition_count,
            passes,
        })
    }

    /// Average partition count previously observed for a shape.
    #[must_use]
    pub fn estimate_partitions(&self, shape: QueryShapeHash) -> Option<f64> {
        self.stats.average(shape)
    }
}

impl Default for SearchCompiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}
