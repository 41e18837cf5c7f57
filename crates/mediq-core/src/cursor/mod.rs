//! Continuation cursor surface: the opaque keyset-pagination token and its
//! wire codec.
//!
//! This module owns only token encoding/decoding and shape binding; how a
//! token narrows the compiled plan lives in the rewrite pipeline.

mod token;

pub use token::{ContinuationSignature, ContinuationToken, SortResume, TokenError};
