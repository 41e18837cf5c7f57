use crate::{schema::types::ResourceTypeId, surrogate::SurrogateId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

///
/// Field
///
/// The closed set of physical columns predicates can address. Logical
/// fields (`Number`, `QuantityValue`) exist only between the parser and the
/// numeric-range rewrite; they never reach the code generator.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum Field {
    // Base resource table (denormalized).
    ResourceTypeId = 0x01,
    ResourceSurrogateId = 0x02,
    ResourceId = 0x03,
    LastUpdated = 0x04,
    IsHistory = 0x05,
    IsDeleted = 0x06,

    // Token search table.
    TokenSystem = 0x10,
    TokenCode = 0x11,

    // String search table.
    Text = 0x20,
    TextOverflow = 0x21,

    // Date search table: values are stored as (start, end) intervals.
    DateStart = 0x30,
    DateEnd = 0x31,
    DateIsLongerThanADay = 0x32,

    // Number search table.
    Number = 0x40,
    NumberLow = 0x41,
    NumberHigh = 0x42,

    // Quantity search table.
    QuantityValue = 0x50,
    QuantityLow = 0x51,
    QuantityHigh = 0x52,
    QuantitySystem = 0x53,
    QuantityCode = 0x54,

    // Reference search table.
    ReferenceResourceTypeId = 0x60,
    ReferenceResourceId = 0x61,

    // Uri search table.
    Uri = 0x70,
}

impl Field {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// True when the column lives on the base resource table and needs no
    /// search-table join.
    #[must_use]
    pub const fn is_resource_column(self) -> bool {
        matches!(
            self,
            Self::ResourceTypeId
                | Self::ResourceSurrogateId
                | Self::ResourceId
                | Self::LastUpdated
                | Self::IsHistory
                | Self::IsDeleted
        )
    }
}

///
/// BinaryOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum BinaryOp {
    Eq = 0x01,
    Ne = 0x02,
    Lt = 0x03,
    Lte = 0x04,
    Gt = 0x05,
    Gte = 0x06,
}

impl BinaryOp {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

///
/// StringMatch
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum StringMatch {
    Equals = 0x01,
    StartsWith = 0x02,
    EndsWith = 0x03,
    Contains = 0x04,
}

impl StringMatch {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

///
/// MultiaryOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum MultiaryOp {
    And = 0x01,
    Or = 0x02,
}

impl MultiaryOp {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

///
/// SortOrder
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    #[must_use]
    pub const fn is_descending(self) -> bool {
        matches!(self, Self::Descending)
    }
}

///
/// Value
///
/// Literal values carried by predicates. Decimals are exact
/// (`rust_decimal`), never floats, so trees stay `Eq`/`Hash` and structural
/// comparison is sound.
///

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Text(String),
    DateTime(DateTime<Utc>),
    TypeId(ResourceTypeId),
    SurrogateId(SurrogateId),
}

impl Value {
    /// Stable discriminant used by the shape hash.
    #[must_use]
    pub const fn kind_tag(&self) -> u8 {
        match self {
            Self::Bool(_) => 0x01,
            Self::Int(_) => 0x02,
            Self::Decimal(_) => 0x03,
            Self::Text(_) => 0x04,
            Self::DateTime(_) => 0x05,
            Self::TypeId(_) => 0x06,
            Self::SurrogateId(_) => 0x07,
        }
    }
}

impl From<ResourceTypeId> for Value {
    fn from(id: ResourceTypeId) -> Self {
        Self::TypeId(id)
    }
}

impl From<SurrogateId> for Value {
    fn from(id: SurrogateId) -> Self {
        Self::SurrogateId(id)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
