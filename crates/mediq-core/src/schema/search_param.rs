use crate::schema::types::ResourceTypeId;
use std::{collections::BTreeMap, sync::Arc};

/// Codes of the built-in parameters the pipeline treats specially.
pub mod param_codes {
    /// Restricts the set of resource types a query may touch.
    pub const TYPE: &str = "_type";
    /// Resource business identifier.
    pub const ID: &str = "_id";
    /// Last-modification instant; rewritten onto the surrogate key.
    pub const LAST_UPDATED: &str = "_lastUpdated";
}

///
/// SearchParamId
///
/// Dense numeric id of a search parameter within one registry generation,
/// used to key search-table rows.
///

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SearchParamId(pub u16);

impl SearchParamId {
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

///
/// SearchParamType
///
/// The closed set of search-parameter shapes. Each maps to exactly one
/// physical search table via the generator factory.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SearchParamType {
    String,
    Token,
    Date,
    Number,
    Quantity,
    Reference,
    Uri,
    Composite,
}

///
/// ComponentDef
///
/// One component of a composite search parameter. `component_index` on
/// expression nodes refers into the owning parameter's component list.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComponentDef {
    pub definition_url: String,
    pub param_type: SearchParamType,
    /// Reference components only: allowed target resource types.
    pub target_types: Vec<ResourceTypeId>,
}

///
/// SearchParamDef
///
/// A search-parameter definition as supplied by the definition source
/// collaborator. Identity is the canonical URL.
///

#[derive(Clone, Debug)]
pub struct SearchParamDef {
    pub url: String,
    pub code: String,
    pub param_type: SearchParamType,
    /// Assigned by the registry; zero until registered.
    pub id: SearchParamId,
    /// Reference parameters only: allowed target resource types.
    pub target_types: Vec<ResourceTypeId>,
    /// Composite parameters only.
    pub components: Vec<ComponentDef>,
}

impl SearchParamDef {
    #[must_use]
    pub fn new(url: impl Into<String>, code: impl Into<String>, ty: SearchParamType) -> Self {
        Self {
            url: url.into(),
            code: code.into(),
            param_type: ty,
            id: SearchParamId(0),
            target_types: Vec::new(),
            components: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = ResourceTypeId>) -> Self {
        self.target_types = targets.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_components(mut self, components: impl IntoIterator<Item = ComponentDef>) -> Self {
        self.components = components.into_iter().collect();
        self
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.param_type == SearchParamType::Reference
    }
}

// Definition identity is the canonical URL; everything else is derived
// content from the same definition source.
impl PartialEq for SearchParamDef {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for SearchParamDef {}

///
/// SearchParamRegistry
///
/// Read-only lookup of search-parameter definitions by canonical URL.
/// Populated once by the definition source; shared across compilations.
///

#[derive(Clone, Debug, Default)]
pub struct SearchParamRegistry {
    by_url: BTreeMap<String, Arc<SearchParamDef>>,
}

impl SearchParamRegistry {
    #[must_use]
    pub fn new(defs: impl IntoIterator<Item = SearchParamDef>) -> Self {
        let by_url = defs
            .into_iter()
            .enumerate()
            .map(|(i, mut def)| {
                def.id = SearchParamId(u16::try_from(i).expect("param id space exhausted"));
                (def.url.clone(), Arc::new(def))
            })
            .collect();

        Self { by_url }
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<Arc<SearchParamDef>> {
        self.by_url.get(url).cloned()
    }
}
