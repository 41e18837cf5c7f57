use std::fmt;

///
/// SchemaVersion
///
/// Monotonic schema generation reported by the storage collaborator.
/// Rewrite passes that assume a physical feature must check the gate before
/// running; a pass is either fully applied or not applied at all.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct SchemaVersion(pub u32);

/// First generation with resource-type partitioned search tables.
pub const PARTITIONED_TABLES: SchemaVersion = SchemaVersion(27);

/// First generation with the string overflow column alongside the bounded
/// inline column.
pub const STRING_OVERFLOW: SchemaVersion = SchemaVersion(27);

impl SchemaVersion {
    /// Latest generation this compiler knows how to target.
    pub const LATEST: Self = Self(54);

    #[must_use]
    pub fn supports_partitioned_tables(self) -> bool {
        self >= PARTITIONED_TABLES
    }

    #[must_use]
    pub fn supports_string_overflow(self) -> bool {
        self >= STRING_OVERFLOW
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}
