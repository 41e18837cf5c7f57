use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

///
/// ResourceTypeId
///
/// Numeric id of a resource type. Doubles as the physical partition key:
/// partition elimination is expressed as a set of these ids.
///

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct ResourceTypeId(pub u16);

impl ResourceTypeId {
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

///
/// ResourceTypeMap
///
/// Bidirectional resource-type name ↔ id mapping supplied by the storage
/// collaborator. Ids are dense small integers assigned at schema install.
///

#[derive(Clone, Debug, Default)]
pub struct ResourceTypeMap {
    names: Vec<String>,
    ids: BTreeMap<String, ResourceTypeId>,
}

impl ResourceTypeMap {
    #[must_use]
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let ids = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let id = u16::try_from(i).expect("resource type id space exhausted");
                (name.clone(), ResourceTypeId(id))
            })
            .collect();

        Self { names, ids }
    }

    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<ResourceTypeId> {
        self.ids.get(name).copied()
    }

    #[must_use]
    pub fn name_of(&self, id: ResourceTypeId) -> Option<&str> {
        self.names.get(usize::from(id.0)).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The set containing every known resource type.
    #[must_use]
    pub fn all_types(&self) -> ResourceTypeSet {
        let mut set = ResourceTypeSet::with_capacity(self.len());
        for i in 0..self.len() {
            set.insert(ResourceTypeId(u16::try_from(i).expect("dense id")));
        }
        set
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = ResourceTypeId> + '_ {
        (0..self.names.len()).map(|i| ResourceTypeId(u16::try_from(i).expect("dense id")))
    }
}

///
/// ResourceTypeSet
///
/// Bitset over resource-type ids used by the partition-elimination analysis.
/// Blocks grow on demand; ids are dense so the set stays small.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceTypeSet {
    blocks: Vec<u64>,
}

impl ResourceTypeSet {
    #[must_use]
    pub const fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(type_count: usize) -> Self {
        Self {
            blocks: vec![0; type_count.div_ceil(64)],
        }
    }

    #[must_use]
    pub fn single(id: ResourceTypeId) -> Self {
        let mut set = Self::new();
        set.insert(id);
        set
    }

    pub fn insert(&mut self, id: ResourceTypeId) {
        let (block, bit) = Self::slot(id);
        if block >= self.blocks.len() {
            self.blocks.resize(block + 1, 0);
        }
        self.blocks[block] |= 1 << bit;
    }

    #[must_use]
    pub fn contains(&self, id: ResourceTypeId) -> bool {
        let (block, bit) = Self::slot(id);
        self.blocks.get(block).is_some_and(|b| b & (1 << bit) != 0)
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut blocks = vec![0; self.blocks.len().max(other.blocks.len())];
        for (i, out) in blocks.iter_mut().enumerate() {
            let a = self.blocks.get(i).copied().unwrap_or(0);
            let b = other.blocks.get(i).copied().unwrap_or(0);
            *out = a | b;
        }
        Self { blocks }
    }

    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let mut blocks = vec![0; self.blocks.len().min(other.blocks.len())];
        for (i, out) in blocks.iter_mut().enumerate() {
            *out = self.blocks[i] & other.blocks[i];
        }
        Self { blocks }
    }

    /// Remove every id strictly greater than `bound`.
    pub fn retain_at_most(&mut self, bound: ResourceTypeId) {
        self.retain(|id| id <= bound);
    }

    /// Remove every id strictly less than `bound`.
    pub fn retain_at_least(&mut self, bound: ResourceTypeId) {
        self.retain(|id| id >= bound);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| *b == 0)
    }

    /// The sole member, if the set has exactly one.
    #[must_use]
    pub fn as_single(&self) -> Option<ResourceTypeId> {
        let mut iter = self.iter();
        let first = iter.next()?;
        if iter.next().is_some() { None } else { Some(first) }
    }

    pub fn iter(&self) -> impl Iterator<Item = ResourceTypeId> + '_ {
        self.blocks.iter().enumerate().flat_map(|(block, bits)| {
            (0..64)
                .filter(move |bit| bits & (1 << bit) != 0)
                .map(move |bit| {
                    ResourceTypeId(u16::try_from(block * 64 + bit).expect("id within u16"))
                })
        })
    }

    fn retain(&mut self, keep: impl Fn(ResourceTypeId) -> bool) {
        let ids: Vec<ResourceTypeId> = self.iter().filter(|id| !keep(*id)).collect();
        for id in ids {
            let (block, bit) = Self::slot(id);
            self.blocks[block] &= !(1 << bit);
        }
    }

    const fn slot(id: ResourceTypeId) -> (usize, u32) {
        ((id.0 as usize) / 64, (id.0 as u32) % 64)
    }
}

impl FromIterator<ResourceTypeId> for ResourceTypeSet {
    fn from_iter<T: IntoIterator<Item = ResourceTypeId>>(iter: T) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_map_assigns_dense_ids() {
        let map = ResourceTypeMap::new(["Patient", "Observation", "Encounter"]);

        assert_eq!(map.id_of("Patient"), Some(ResourceTypeId(0)));
        assert_eq!(map.id_of("Encounter"), Some(ResourceTypeId(2)));
        assert_eq!(map.name_of(ResourceTypeId(1)), Some("Observation"));
        assert_eq!(map.id_of("Missing"), None);
    }

    #[test]
    fn set_union_and_intersection() {
        let a: ResourceTypeSet = [ResourceTypeId(1), ResourceTypeId(65)]
            .into_iter()
            .collect();
        let b: ResourceTypeSet = [ResourceTypeId(1), ResourceTypeId(2)].into_iter().collect();

        let union = a.union(&b);
        assert_eq!(union.len(), 3);
        assert!(union.contains(ResourceTypeId(65)));

        let inter = a.intersect(&b);
        assert_eq!(inter.as_single(), Some(ResourceTypeId(1)));
    }

    #[test]
    fn set_bound_retention() {
        let mut set: ResourceTypeSet = [ResourceTypeId(3), ResourceTypeId(7), ResourceTypeId(12)]
            .into_iter()
            .collect();

        set.retain_at_most(ResourceTypeId(7));
        assert!(set.contains(ResourceTypeId(3)));
        assert!(set.contains(ResourceTypeId(7)));
        assert!(!set.contains(ResourceTypeId(12)));

        set.retain_at_least(ResourceTypeId(7));
        assert_eq!(set.as_single(), Some(ResourceTypeId(7)));
    }

    #[test]
    fn empty_set_has_no_single() {
        let set = ResourceTypeSet::new();
        assert!(set.is_empty());
        assert_eq!(set.as_single(), None);
    }
}
