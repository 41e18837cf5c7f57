//! Mediq: a query-compilation core for clinical resource search.
//!
//! ## Crate layout
//! - `core::expr`: the immutable search-expression model and shape hashing.
//! - `core::compile`: the rewrite pipeline, planners, and the compiler entry
//!   point.
//! - `core::cursor`: opaque continuation tokens for keyset pagination.
//! - `core::sql`: parameterized SQL generation.
//! - `core::stats`: the partition-statistics cache.
//!
//! The `prelude` module mirrors the surface a search service uses.

pub use mediq_core as core;

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use mediq_core::compile::{CompileError, CompiledQuery, SearchCompiler};

///
/// Prelude
///

pub mod prelude {
    pub use mediq_core::prelude::*;
}
