//! Session-wide memo of child counts and sizes keyed by parent entity id.
//!
//! An entry exists only once a value was computed; an absent field means
//! "unknown", never zero. Entries are never invalidated for the session.

use std::collections::HashMap;

use serde::Serialize;

use crate::catalog::CatalogClient;
use crate::domain::{CartEntityType, EntityType};
use crate::download_api::DownloadClient;
use crate::error::GatewayError;
use crate::query::{AdditionalFilter, ApiQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub child_entity_count: Option<u64>,
    pub child_entity_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheUpdate {
    pub count: Option<u64>,
    pub size: Option<u64>,
}

impl CacheUpdate {
    pub fn count(count: u64) -> Self {
        Self {
            count: Some(count),
            size: None,
        }
    }

    pub fn size(size: u64) -> Self {
        Self {
            count: None,
            size: Some(size),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityCache {
    entries: HashMap<u64, CacheEntry>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, parent_id: u64) -> Option<CacheEntry> {
        self.entries.get(&parent_id).copied()
    }

    /// Merges into the existing entry; a `None` field leaves the old value.
    pub fn put(&mut self, parent_id: u64, update: CacheUpdate) {
        if update == CacheUpdate::default() {
            return;
        }
        let entry = self.entries.entry(parent_id).or_default();
        if let Some(count) = update.count {
            entry.child_entity_count = Some(count);
        }
        if let Some(size) = update.size {
            entry.child_entity_size = Some(size);
        }
    }

    pub fn count(&self, parent_id: u64) -> Option<u64> {
        self.get(parent_id).and_then(|entry| entry.child_entity_count)
    }

    pub fn size(&self, parent_id: u64) -> Option<u64> {
        self.get(parent_id).and_then(|entry| entry.child_entity_size)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One cache per parent level that has aggregates.
#[derive(Debug, Clone, Default)]
pub struct EntityCaches {
    pub investigation: EntityCache,
    pub dataset: EntityCache,
}

impl EntityCaches {
    pub fn for_type_mut(&mut self, entity_type: CartEntityType) -> Option<&mut EntityCache> {
        match entity_type {
            CartEntityType::Investigation => Some(&mut self.investigation),
            CartEntityType::Dataset => Some(&mut self.dataset),
            CartEntityType::Datafile => None,
        }
    }
}

/// Where an aggregate value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<T> {
    Cached(T),
    Fetched(T),
}

impl<T> Lookup<T> {
    pub fn into_value(self) -> T {
        match self {
            Lookup::Cached(value) | Lookup::Fetched(value) => value,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Lookup::Cached(_))
    }
}

/// Total size of an entity's files; a cache hit issues no request.
pub fn resolve_size<D: DownloadClient + ?Sized>(
    caches: &mut EntityCaches,
    downloads: &D,
    entity_type: CartEntityType,
    entity_id: u64,
) -> Result<Lookup<u64>, GatewayError> {
    if let Some(size) = caches
        .for_type_mut(entity_type)
        .and_then(|cache| cache.size(entity_id))
    {
        tracing::debug!(%entity_type, entity_id, "size cache hit");
        return Ok(Lookup::Cached(size));
    }
    let size = downloads.size(entity_type, entity_id)?;
    if let Some(cache) = caches.for_type_mut(entity_type) {
        cache.put(entity_id, CacheUpdate::size(size));
    }
    Ok(Lookup::Fetched(size))
}

/// Number of direct children (datasets of an investigation, datafiles of a dataset).
pub fn resolve_child_count<C: CatalogClient + ?Sized>(
    caches: &mut EntityCaches,
    catalog: &C,
    parent_type: CartEntityType,
    parent_id: u64,
) -> Result<Lookup<u64>, GatewayError> {
    let (child_type, parent_column) = match parent_type {
        CartEntityType::Investigation => (EntityType::Dataset, "INVESTIGATION_ID"),
        CartEntityType::Dataset => (EntityType::Datafile, "DATASET_ID"),
        CartEntityType::Datafile => {
            return Err(GatewayError::InvalidEntityType(format!(
                "{parent_type} has no children"
            )));
        }
    };
    if let Some(count) = caches
        .for_type_mut(parent_type)
        .and_then(|cache| cache.count(parent_id))
    {
        tracing::debug!(%parent_type, parent_id, "count cache hit");
        return Ok(Lookup::Cached(count));
    }
    let query = ApiQuery::default().with_additional(&[AdditionalFilter::eq(parent_column, parent_id)]);
    let count = catalog.count(child_type, &query)?;
    if let Some(cache) = caches.for_type_mut(parent_type) {
        cache.put(parent_id, CacheUpdate::count(count));
    }
    Ok(Lookup::Fetched(count))
}
