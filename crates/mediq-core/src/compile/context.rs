//! Compilation context: per-request inputs shared by every rewrite pass.

use crate::{
    cursor::{ContinuationSignature, ContinuationToken},
    schema::SchemaModel,
};

///
/// CompileOptions
///
/// Caller-tunable knobs for one compilation. Defaults mirror the
/// server-side limits.
///

#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    /// Requested page size; the generated query fetches one extra row to
    /// detect whether more results exist.
    pub page_size: u32,

    /// Maximum number of include directives accepted in a single query.
    pub max_includes: usize,

    /// Optional cap on rows produced per include step.
    pub include_count_limit: Option<u32>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_includes: 64,
            include_count_limit: Some(1_000),
        }
    }
}

///
/// CompileContext
///
/// Read-only inputs threaded through the rewrite pipeline. Passes never
/// mutate the context; all mutable state lives in the plan itself.
///

pub struct CompileContext<'a> {
    pub schema: &'a SchemaModel,
    pub options: CompileOptions,

    /// Decoded continuation token, if the caller is resuming a page.
    pub token: Option<ContinuationToken>,

    /// Signature the current query shape and schema version produce;
    /// tokens are only accepted when they carry the same signature.
    pub signature: ContinuationSignature,
}

impl<'a> CompileContext<'a> {
    #[must_use]
    pub fn new(
        schema: &'a SchemaModel,
        options: CompileOptions,
        token: Option<ContinuationToken>,
        signature: ContinuationSignature,
    ) -> Self {
        Self {
            schema,
            options,
            token,
            signature,
        }
    }
}
