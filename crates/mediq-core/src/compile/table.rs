//! Generator factories: resolving a search parameter to the physical table
//! handler responsible for rendering it.
//!
//! Resolution is pure and deterministic, so the per-URL memo uses
//! first-writer-wins semantics; duplicate computation on a race is
//! harmless.

use crate::{
    error::InternalError,
    schema::search_param::{SearchParamDef, SearchParamType, param_codes},
};
use std::{
    collections::HashMap,
    sync::{OnceLock, RwLock},
};

///
/// SearchTable
///
/// The closed set of physical tables a plan step can target.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SearchTable {
    Resource,
    Token,
    String,
    Date,
    Number,
    Quantity,
    Reference,
    Uri,
    Compartment,
    Composite(CompositeTable),
}

///
/// CompositeTable
///
/// Physical composite tables, keyed by the types of the first two
/// components. Other combinations are not materialized by the schema.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompositeTable {
    TokenToken,
    TokenDate,
    TokenNumber,
    TokenQuantity,
    TokenString,
}

impl SearchTable {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Resource => "dbo.Resource",
            Self::Token => "dbo.TokenSearchParam",
            Self::String => "dbo.StringSearchParam",
            Self::Date => "dbo.DateTimeSearchParam",
            Self::Number => "dbo.NumberSearchParam",
            Self::Quantity => "dbo.QuantitySearchParam",
            Self::Reference => "dbo.ReferenceSearchParam",
            Self::Uri => "dbo.UriSearchParam",
            Self::Compartment => "dbo.CompartmentAssignment",
            Self::Composite(CompositeTable::TokenToken) => "dbo.TokenTokenCompositeSearchParam",
            Self::Composite(CompositeTable::TokenDate) => "dbo.TokenDateTimeCompositeSearchParam",
            Self::Composite(CompositeTable::TokenNumber) => "dbo.TokenNumberCompositeSearchParam",
            Self::Composite(CompositeTable::TokenQuantity) => {
                "dbo.TokenQuantityCompositeSearchParam"
            }
            Self::Composite(CompositeTable::TokenString) => "dbo.TokenStringCompositeSearchParam",
        }
    }
}

///
/// TableBinding
///
/// How one search parameter maps onto physical storage.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableBinding {
    /// Answerable from base resource-table columns; no join needed.
    Denormalized,
    /// Requires a join against the given search table.
    Table(SearchTable),
}

static BINDINGS: OnceLock<RwLock<HashMap<String, TableBinding>>> = OnceLock::new();

/// Resolve the table binding for a search parameter, memoized per URL.
pub(crate) fn binding_for(param: &SearchParamDef) -> Result<TableBinding, InternalError> {
    let memo = BINDINGS.get_or_init(|| RwLock::new(HashMap::new()));

    if let Ok(read) = memo.read()
        && let Some(binding) = read.get(&param.url)
    {
        return Ok(*binding);
    }

    let binding = resolve(param)?;

    if let Ok(mut write) = memo.write() {
        // First writer wins; a racing resolve computed the same value.
        write.entry(param.url.clone()).or_insert(binding);
    }

    Ok(binding)
}

fn resolve(param: &SearchParamDef) -> Result<TableBinding, InternalError> {
    if matches!(
        param.code.as_str(),
        param_codes::TYPE | param_codes::ID | param_codes::LAST_UPDATED
    ) {
        return Ok(TableBinding::Denormalized);
    }

    let table = match param.param_type {
        SearchParamType::String => SearchTable::String,
        SearchParamType::Token => SearchTable::Token,
        SearchParamType::Date => SearchTable::Date,
        SearchParamType::Number => SearchTable::Number,
        SearchParamType::Quantity => SearchTable::Quantity,
        SearchParamType::Reference => SearchTable::Reference,
        SearchParamType::Uri => SearchTable::Uri,
        SearchParamType::Composite => SearchTable::Composite(composite_table(param)?),
    };

    Ok(TableBinding::Table(table))
}

fn composite_table(param: &SearchParamDef) -> Result<CompositeTable, InternalError> {
    let mut types = param.components.iter().map(|c| c.param_type);
    let first = types.next();
    let second = types.next();

    match (first, second) {
        (Some(SearchParamType::Token), Some(SearchParamType::Token)) => {
            Ok(CompositeTable::TokenToken)
        }
        (Some(SearchParamType::Token), Some(SearchParamType::Date)) => {
            Ok(CompositeTable::TokenDate)
        }
        (Some(SearchParamType::Token), Some(SearchParamType::Number)) => {
            Ok(CompositeTable::TokenNumber)
        }
        (Some(SearchParamType::Token), Some(SearchParamType::Quantity)) => {
            Ok(CompositeTable::TokenQuantity)
        }
        (Some(SearchParamType::Token), Some(SearchParamType::String)) => {
            Ok(CompositeTable::TokenString)
        }
        _ => Err(InternalError::schema_unsupported(format!(
            "no composite table for components of '{}'",
            param.url
        ))),
    }
}
