//! Lazily built identifier → subscription lookup.

use std::collections::HashMap;

use tracing::debug;

use super::subscription::SubscriptionTable;

/// Maps observed CAN identifiers to the indices of matching subscriptions.
///
/// Entries hold table indices, never channel handles. Removing a subscription
/// shifts indices, so every removal must be followed by [`invalidate`](Self::invalidate).
#[derive(Debug, Default)]
pub struct RoutingCache {
    entries: HashMap<u32, Vec<usize>>,
    hits: u64,
    misses: u64,
}

impl RoutingCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indices of subscriptions matching `can_id`.
    ///
    /// The table is scanned at most once per distinct identifier between
    /// invalidations; empty results are cached too.
    pub fn resolve(&mut self, can_id: u32, table: &SubscriptionTable) -> &[usize] {
        if self.entries.contains_key(&can_id) {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        self.entries
            .entry(can_id)
            .or_insert_with(|| table.matching(can_id))
            .as_slice()
    }

    /// Drop every entry. Hit and miss counters are cumulative.
    pub fn invalidate(&mut self) {
        if !self.entries.is_empty() {
            debug!(
                entries = self.entries.len(),
                hits = self.hits,
                misses = self.misses,
                "Routing cache invalidated"
            );
        }
        self.entries.clear();
    }

    /// Whether `can_id` has an entry.
    pub fn contains(&self, can_id: u32) -> bool {
        self.entries.contains_key(&can_id)
    }

    /// Number of cached identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that required a table scan.
    pub fn misses(&self) -> u64 {
        self.misses
    }
}
