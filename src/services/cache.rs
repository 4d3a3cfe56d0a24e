//! Local cache of normalized location aggregates
//!
//! Fed by the store subscription (full replacement per snapshot) and by
//! successful local writes (single-entry upserts). Every entry is normalized
//! on the way in, so readers never see raw documents.

use crate::domain::normalize::{normalize_location_aggregate, NormalizeOptions};
use crate::domain::types::{LocationAggregate, LocationId};
use crate::io::store::StoredLocation;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::hash_map::Entry;
use tracing::debug;

#[derive(Debug, Default)]
pub struct LocationCache {
    entries: FxHashMap<LocationId, LocationAggregate>,
    /// Ids in subscription order (by name); upserted newcomers go last
    order: Vec<LocationId>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole cache with a store snapshot
    pub fn apply_snapshot(&mut self, snapshot: &[StoredLocation], opts: &NormalizeOptions) {
        self.entries.clear();
        self.order.clear();
        for location in snapshot {
            let aggregate = normalize_location_aggregate(&location.id, &location.data, opts);
            if self.entries.insert(location.id.clone(), aggregate).is_none() {
                self.order.push(location.id.clone());
            }
        }
        debug!(locations = self.entries.len(), "cache_refreshed");
    }

    /// Insert or replace one entry from a raw document
    pub fn upsert_document(&mut self, id: &LocationId, data: &Value, opts: &NormalizeOptions) -> &LocationAggregate {
        let aggregate = normalize_location_aggregate(id, data, opts);
        self.upsert(aggregate)
    }

    /// Insert or replace one already-normalized entry
    pub fn upsert(&mut self, aggregate: LocationAggregate) -> &LocationAggregate {
        match self.entries.entry(aggregate.id.clone()) {
            Entry::Occupied(mut slot) => {
                slot.insert(aggregate);
                slot.into_mut()
            }
            Entry::Vacant(slot) => {
                self.order.push(aggregate.id.clone());
                slot.insert(aggregate)
            }
        }
    }

    pub fn get(&self, id: &LocationId) -> Option<&LocationAggregate> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &LocationId) -> bool {
        self.entries.contains_key(id)
    }

    /// Entries in display order
    pub fn iter(&self) -> impl Iterator<Item = &LocationAggregate> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
