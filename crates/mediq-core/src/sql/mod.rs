//! SQL generation: rendering a compiled plan as one parameterized T-SQL
//! statement with a CTE per plan step.

pub mod codegen;
pub mod params;

pub use codegen::SqlOutput;
pub use params::{ParameterSet, SqlParameter};

pub(crate) use codegen::emit;
