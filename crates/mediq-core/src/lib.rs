//! Core query compiler for Mediq: the immutable search-expression model,
//! the rewrite pipeline, the SQL code generator, and the ergonomics
//! exported via the `prelude`.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod compile;
pub mod cursor;
pub mod error;
pub mod expr;
pub mod schema;
pub mod serialize;
pub mod sql;
pub mod stats;
pub mod surrogate;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// Internals like the pass list, serializers, and the stats cache stay out.
///

pub mod prelude {
    pub use crate::{
        compile::{CompileError, CompileOptions, CompiledQuery, SearchCompiler},
        cursor::{ContinuationToken, SortResume},
        expr::{BinaryOp, Expression, Field, MultiaryOp, SortOrder, StringMatch, Value},
        schema::{
            ResourceTypeId, ResourceTypeMap, SchemaModel, SchemaVersion, SearchParamDef,
            SearchParamRegistry, SearchParamType,
        },
        surrogate::SurrogateId,
    };
}
