//! The immutable search-expression model.
//!
//! Trees are produced by the upstream query-string parser and consumed by
//! the rewrite pipeline. Nodes are never mutated in place; every rewrite
//! returns a new (sub)tree, so trees can be shared across requests and
//! compared structurally.

pub mod node;
pub mod ops;
pub mod shape;

pub use node::{ChainSpec, Expression, IncludeSpec};
pub use ops::{BinaryOp, Field, MultiaryOp, SortOrder, StringMatch, Value};
pub use shape::QueryShapeHash;
