//! Collaborator contracts: the resource-type/partition model, the schema
//! version gate, and the search-parameter definition source.
//!
//! Nothing in this module performs query compilation; it is the surface the
//! surrounding server wires in before handing expressions to the compiler.

pub mod search_param;
pub mod types;
pub mod version;

pub use search_param::{
    ComponentDef, SearchParamDef, SearchParamId, SearchParamRegistry, SearchParamType, param_codes,
};
pub use types::{ResourceTypeId, ResourceTypeMap, ResourceTypeSet};
pub use version::SchemaVersion;

///
/// SchemaModel
///
/// The physical-schema view a compilation runs against: resource types with
/// their partition ids, and the deployed schema generation.
///

#[derive(Clone, Debug)]
pub struct SchemaModel {
    pub types: ResourceTypeMap,
    pub version: SchemaVersion,
}

impl SchemaModel {
    #[must_use]
    pub const fn new(types: ResourceTypeMap, version: SchemaVersion) -> Self {
        Self { types, version }
    }
}
