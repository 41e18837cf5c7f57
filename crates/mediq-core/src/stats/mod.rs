//! Partition statistics: a bounded cache of observed partition counts per
//! query shape.
//!
//! The cache is advisory. Lock poisoning or eviction only costs an
//! estimate, never a compilation, so every failure path degrades to "no
//! data".

use crate::expr::QueryShapeHash;
use lru::LruCache;
use std::{num::NonZeroUsize, sync::Mutex};

const DEFAULT_CAPACITY: usize = 512;

///
/// PartitionStatsCache
///
/// Running average of partition counts keyed by query shape, evicting the
/// least recently observed shapes.
///

#[derive(Debug)]
pub struct PartitionStatsCache {
    entries: Mutex<LruCache<QueryShapeHash, StatsEntry>>,
}

#[derive(Clone, Copy, Debug, Default)]
struct StatsEntry {
    sum: u64,
    count: u64,
}

impl PartitionStatsCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record one observed partition count for a shape.
    pub fn observe(&self, shape: QueryShapeHash, partitions: usize) {
        let Ok(mut entries) = self.entries.lock() else {
            tracing::warn!("partition stats lock poisoned; dropping observation");
            return;
        };
        let entry = entries.get_or_insert_mut(shape, StatsEntry::default);
        entry.sum = entry.sum.saturating_add(partitions as u64);
        entry.count = entry.count.saturating_add(1);
    }

    /// Average observed partition count for a shape, if any.
    #[must_use]
    pub fn average(&self, shape: QueryShapeHash) -> Option<f64> {
        let Ok(mut entries) = self.entries.lock() else {
            tracing::warn!("partition stats lock poisoned; no estimate");
            return None;
        };
        let entry = entries.get(&shape)?;
        if entry.count == 0 {
            return None;
        }
        #[expect(clippy::cast_precision_loss)]
        Some(entry.sum as f64 / entry.count as f64)
    }

    /// Number of shapes currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |e| e.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PartitionStatsCache {
    fn default() -> Self {
        Self::new()
    }
}
