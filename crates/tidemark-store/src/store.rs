//! Process-wide cache store with entity normalization.
//!
//! The `CacheStore` maintains:
//! - Typed query results addressed by structured keys
//! - A reverse index from entity identity to every embedding query
//! - Canonical entity snapshots merged from normalized query results
//! - In-flight fetch registrations so cancellation fences stale writes
//! - A broadcast channel for cache update events

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

use crate::config::StoreConfig;
use crate::key::QueryKey;
use crate::normalize::{AnyEntity, CachedValue, Entity, EntityKey, Normalize, OptimisticEdit};
use crate::pagination::{Page, Paginated};

/// Update event for store subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A query entry was created from a fetch or first write.
    EntryPopulated { key: QueryKey },
    /// A query entry was rewritten in place.
    EntryUpdated { key: QueryKey },
    /// A query entry was evicted.
    EntryEvicted { key: QueryKey },
    /// An entity's canonical fields were written and fanned out.
    EntityWritten { entity: EntityKey },
    /// A query entry was marked stale; its owner should refetch.
    Invalidated { key: QueryKey },
}

/// Registration of one in-flight fetch.
struct Inflight {
    cancel_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct StoreInner {
    /// Cached query results by key.
    entries: HashMap<QueryKey, Box<dyn CachedValue>>,
    /// Entity identity -> keys of live entries embedding it.
    entity_index: HashMap<EntityKey, HashSet<QueryKey>>,
    /// Key -> entities embedded in its entry, for cheap pruning.
    key_entities: HashMap<QueryKey, HashSet<EntityKey>>,
    /// Canonical merged snapshot per entity.
    entities: HashMap<EntityKey, Box<dyn AnyEntity>>,
    /// In-flight fetches by key.
    inflight: HashMap<QueryKey, Vec<Arc<Inflight>>>,
}

impl StoreInner {
    /// Drop the reverse-index associations of `key`.
    ///
    /// Canonical snapshots are dropped with their last embedding entry.
    fn unindex(&mut self, key: &QueryKey) {
        let Some(old) = self.key_entities.remove(key) else {
            return;
        };
        for entity in old {
            if let Some(keys) = self.entity_index.get_mut(&entity) {
                keys.remove(key);
                if keys.is_empty() {
                    self.entity_index.remove(&entity);
                    self.entities.remove(&entity);
                }
            }
        }
    }

    /// Rescan the entry at `key`, refreshing the reverse index.
    ///
    /// With `refresh_canonical` the canonical snapshots are overwritten from
    /// the entry's embedded copies (fetch and direct-write paths, where the
    /// entry is the freshest data). Without it, snapshots are only created
    /// for entities the cache has not seen: a fan-out or rollback rescan
    /// must not regress canonicals of entities the write never targeted,
    /// whose freshest copy may live in a different entry.
    fn reindex(&mut self, key: &QueryKey, refresh_canonical: bool) {
        self.unindex(key);
        let Some(value) = self.entries.get(key) else {
            return;
        };
        let mut seen: HashSet<EntityKey> = HashSet::new();
        let entities = &mut self.entities;
        value.visit(&mut |entity: &dyn AnyEntity| {
            let entity_key = entity.entity_key();
            if refresh_canonical || !entities.contains_key(&entity_key) {
                entities.insert(entity_key.clone(), entity.clone_box());
            }
            seen.insert(entity_key);
        });
        for entity_key in &seen {
            self.entity_index
                .entry(entity_key.clone())
                .or_default()
                .insert(key.clone());
        }
        self.key_entities.insert(key.clone(), seen);
    }

    /// Remove one fetch registration for `key`.
    fn unregister_fetch(&mut self, key: &QueryKey, inflight: &Arc<Inflight>) {
        if let Some(list) = self.inflight.get_mut(key) {
            list.retain(|other| !Arc::ptr_eq(other, inflight));
            if list.is_empty() {
                self.inflight.remove(key);
            }
        }
    }
}

/// Process-wide cache store.
///
/// Holds every outstanding query result, the reverse index used for entity
/// fan-out, and canonical entity snapshots. All mutations are synchronous
/// function calls; consumers construct one store per client session and
/// share it by `Arc`.
pub struct CacheStore {
    inner: RwLock<StoreInner>,
    events_tx: broadcast::Sender<CacheEvent>,
}

impl CacheStore {
    /// Create a new empty store with default configuration.
    pub fn new() -> Arc<Self> {
        Self::with_config(StoreConfig::default())
    }

    /// Create a new empty store with explicit configuration.
    pub fn with_config(config: StoreConfig) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            inner: RwLock::new(StoreInner::default()),
            events_tx,
        })
    }

    /// Subscribe to cache update events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events_tx.subscribe()
    }

    /// Send a cache event to subscribers.
    fn broadcast(&self, event: CacheEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("no subscribers for cache event");
        }
    }

    // =========================================================================
    // Query cache adapter
    // =========================================================================

    /// Get a typed query value by key.
    ///
    /// Absent entries and entries of a different type both read as `None`;
    /// a type mismatch is logged since it usually means two features are
    /// sharing a key by accident.
    pub fn get<T: CachedValue + Clone>(&self, key: &QueryKey) -> Option<T> {
        let inner = self.inner.read();
        let value = inner.entries.get(key)?;
        match value.as_any().downcast_ref::<T>() {
            Some(typed) => Some(typed.clone()),
            None => {
                warn!(%key, expected = std::any::type_name::<T>(), "cache: entry has unexpected type");
                None
            }
        }
    }

    /// Whether a query entry exists for `key`.
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Number of cached query entries.
    pub fn entry_count(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Number of tracked canonical entities.
    pub fn entity_count(&self) -> usize {
        self.inner.read().entities.len()
    }

    /// Populate (or overwrite) the entry at `key` with a fetched value.
    ///
    /// This is the fetch-completion path: it creates entries, unlike
    /// [`update`](Self::update), and registers the entry's embedded entities
    /// in the reverse index.
    pub fn populate<T: CachedValue>(&self, key: QueryKey, value: T) {
        let mut inner = self.inner.write();
        let created = !inner.entries.contains_key(&key);
        inner.entries.insert(key.clone(), Box::new(value));
        inner.reindex(&key, true);
        drop(inner);
        trace!(%key, created, "cache: entry populated");
        self.broadcast(if created {
            CacheEvent::EntryPopulated { key }
        } else {
            CacheEvent::EntryUpdated { key }
        });
    }

    /// Apply `f` to the typed entry at `key`.
    ///
    /// No-ops when the query was never populated: cache entries are not
    /// created speculatively for queries that were never fetched.
    pub fn update<T: CachedValue>(&self, key: &QueryKey, f: impl FnOnce(&mut T)) -> bool {
        let mut inner = self.inner.write();
        let Some(value) = inner.entries.get_mut(key) else {
            trace!(%key, "cache: update skipped, entry never populated");
            return false;
        };
        let Some(typed) = value.as_any_mut().downcast_mut::<T>() else {
            warn!(%key, expected = std::any::type_name::<T>(), "cache: update skipped, unexpected type");
            return false;
        };
        f(typed);
        inner.reindex(key, true);
        drop(inner);
        self.broadcast(CacheEvent::EntryUpdated { key: key.clone() });
        true
    }

    /// Apply `f` to every page of every cached paginated query whose key
    /// equals, or is prefixed by, `prefix`.
    ///
    /// Returns the number of entries touched. Used both for a single
    /// paginated query (exact key) and for a whole feature family, e.g.
    /// every notifications filter at once.
    pub fn update_paginated<T: Normalize + Clone>(
        &self,
        prefix: &QueryKey,
        mut f: impl FnMut(&mut Page<T>),
    ) -> usize {
        let mut inner = self.inner.write();
        let keys: Vec<QueryKey> = inner
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        let mut touched = Vec::new();
        for key in keys {
            let Some(value) = inner.entries.get_mut(&key) else {
                continue;
            };
            let Some(paginated) = value.as_any_mut().downcast_mut::<Paginated<T>>() else {
                continue;
            };
            for page in &mut paginated.pages {
                f(page);
            }
            inner.reindex(&key, true);
            touched.push(key);
        }
        drop(inner);
        let count = touched.len();
        for key in touched {
            self.broadcast(CacheEvent::EntryUpdated { key });
        }
        if count > 0 {
            trace!(%prefix, entries = count, "cache: paginated family updated");
        }
        count
    }

    /// Evict the entry at `key`, pruning its reverse-index associations.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let mut inner = self.inner.write();
        if inner.entries.remove(key).is_none() {
            return false;
        }
        inner.unindex(key);
        drop(inner);
        trace!(%key, "cache: entry evicted");
        self.broadcast(CacheEvent::EntryEvicted { key: key.clone() });
        true
    }

    /// Mark every entry in the `prefix` family stale.
    ///
    /// Entries stay readable for render continuity; owners are expected to
    /// refetch on the broadcast [`CacheEvent::Invalidated`] and repopulate.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let keys: Vec<QueryKey> = {
            let inner = self.inner.read();
            inner
                .entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect()
        };
        let count = keys.len();
        if count > 0 {
            debug!(%prefix, entries = count, "cache: family invalidated");
        }
        for key in keys {
            self.broadcast(CacheEvent::Invalidated { key });
        }
        count
    }

    /// Clear all cached data.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.entity_index.clear();
        inner.key_entities.clear();
        inner.entities.clear();
        drop(inner);
        debug!("cache cleared");
    }

    // =========================================================================
    // Entity normalizer
    // =========================================================================

    /// Current canonical snapshot of an entity.
    pub fn entity<E: Entity>(&self, id: &str) -> Option<E> {
        let entity_key = EntityKey::new(E::KIND, id);
        let inner = self.inner.read();
        inner
            .entities
            .get(&entity_key)
            .and_then(|entity| entity.as_any().downcast_ref::<E>())
            .cloned()
    }

    /// Merge an update into the canonical entity and rewrite every cached
    /// copy, capturing previous values into the returned edit record.
    ///
    /// Unknown entities yield an empty record: an entity exists only once a
    /// query result embedding it has been normalized.
    pub fn set_entity<E: Entity>(&self, id: &str, update: impl FnOnce(&mut E)) -> OptimisticEdit {
        let entity_key = EntityKey::new(E::KIND, id);
        let mut inner = self.inner.write();
        let Some(current) = inner
            .entities
            .get(&entity_key)
            .and_then(|entity| entity.as_any().downcast_ref::<E>())
            .cloned()
        else {
            trace!(entity = %entity_key, "cache: set on unknown entity is a no-op");
            return OptimisticEdit::empty(entity_key);
        };
        let previous_entity: Box<dyn AnyEntity> = Box::new(current.clone());
        let mut next = current;
        update(&mut next);
        let edit = Self::write_entity(&mut inner, entity_key.clone(), next, Some(previous_entity));
        drop(inner);
        for key in edit.touched_keys() {
            self.broadcast(CacheEvent::EntryUpdated { key: key.clone() });
        }
        self.broadcast(CacheEvent::EntityWritten { entity: entity_key });
        edit
    }

    /// Commit an authoritative server payload for an entity.
    ///
    /// The server value replaces the canonical snapshot and every cached
    /// copy unconditionally, superseding any still-pending optimistic value.
    pub fn commit_entity<E: Entity>(&self, server: E) {
        let entity_key = Entity::entity_key(&server);
        let mut inner = self.inner.write();
        let edit = Self::write_entity(&mut inner, entity_key.clone(), server, None);
        drop(inner);
        for key in edit.touched_keys() {
            self.broadcast(CacheEvent::EntryUpdated { key: key.clone() });
        }
        self.broadcast(CacheEvent::EntityWritten { entity: entity_key });
    }

    /// Restore every entry touched by `edit` to its captured previous value,
    /// along with the canonical snapshot.
    ///
    /// Writes are order-independent: each key's value was captured before
    /// this specific edit applied.
    pub fn rollback(&self, edit: OptimisticEdit) {
        let OptimisticEdit {
            entity,
            previous_entity,
            previous,
            ..
        } = edit;
        let mut inner = self.inner.write();
        let mut restored = Vec::with_capacity(previous.len());
        for (key, value) in previous {
            inner.entries.insert(key.clone(), value);
            inner.reindex(&key, false);
            restored.push(key);
        }
        if let Some(previous_entity) = previous_entity {
            inner.entities.insert(entity.clone(), previous_entity);
        }
        drop(inner);
        debug!(entity = %entity, entries = restored.len(), "cache: optimistic edit rolled back");
        for key in restored {
            self.broadcast(CacheEvent::EntryUpdated { key });
        }
        self.broadcast(CacheEvent::EntityWritten { entity });
    }

    /// Fan `next` out to every entry embedding `entity_key`, updating the
    /// canonical snapshot.
    ///
    /// Captures previous entry values when `previous_entity` is supplied
    /// (the optimistic path); the commit path skips capture.
    fn write_entity<E: Entity>(
        inner: &mut StoreInner,
        entity_key: EntityKey,
        next: E,
        previous_entity: Option<Box<dyn AnyEntity>>,
    ) -> OptimisticEdit {
        let capture = previous_entity.is_some();
        let touched: Vec<QueryKey> = inner
            .entity_index
            .get(&entity_key)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        let mut previous = Vec::new();
        for key in &touched {
            let Some(value) = inner.entries.get_mut(key) else {
                continue;
            };
            if capture {
                previous.push((key.clone(), value.clone_box()));
            }
            let hit = value.rewrite(&entity_key, &mut |any: &mut dyn Any| {
                if let Some(slot) = any.downcast_mut::<E>() {
                    *slot = next.clone();
                }
            });
            if !hit {
                warn!(%key, entity = %entity_key, "cache: fan-out missed an indexed entry");
            }
        }
        for key in &touched {
            inner.reindex(key, false);
        }
        inner.entities.insert(entity_key.clone(), Box::new(next));
        trace!(entity = %entity_key, fan_out = touched.len(), "cache: entity written");
        OptimisticEdit::new(entity_key, previous_entity, previous, touched)
    }

    // =========================================================================
    // In-flight fetch tracking
    // =========================================================================

    /// Register an in-flight fetch for `key`.
    ///
    /// The returned guard writes the result through
    /// [`FetchGuard::complete`]; a cancellation issued between registration
    /// and completion turns the completion into a no-op.
    pub fn begin_fetch(self: &Arc<Self>, key: QueryKey) -> FetchGuard {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let inflight = Arc::new(Inflight { cancel_tx });
        self.inner
            .write()
            .inflight
            .entry(key.clone())
            .or_default()
            .push(Arc::clone(&inflight));
        trace!(%key, "cache: fetch registered");
        FetchGuard {
            store: Arc::clone(self),
            key: Some(key),
            inflight,
            cancel_rx,
        }
    }

    /// Abort in-flight fetches for every key in the `prefix` family.
    ///
    /// Idempotent, and safe to call after the fetches already completed.
    /// Callers must await this before applying a paired optimistic write so
    /// a late-arriving response cannot clobber the fresh value.
    pub async fn cancel(&self, prefix: &QueryKey) {
        let cancelled = {
            let mut inner = self.inner.write();
            let keys: Vec<QueryKey> = inner
                .inflight
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            let mut cancelled = 0usize;
            for key in keys {
                for inflight in inner.inflight.remove(&key).unwrap_or_default() {
                    // Receivers may be gone when the fetch already finished.
                    let _ = inflight.cancel_tx.send(true);
                    cancelled += 1;
                }
            }
            cancelled
        };
        if cancelled > 0 {
            debug!(%prefix, fetches = cancelled, "cache: in-flight fetches cancelled");
        }
    }

    /// Number of registered in-flight fetches.
    pub fn inflight_count(&self) -> usize {
        self.inner.read().inflight.values().map(Vec::len).sum()
    }
}

/// Guard for one registered in-flight fetch.
///
/// Dropping the guard without completing unregisters the fetch.
pub struct FetchGuard {
    store: Arc<CacheStore>,
    key: Option<QueryKey>,
    inflight: Arc<Inflight>,
    cancel_rx: watch::Receiver<bool>,
}

impl FetchGuard {
    /// Whether this fetch has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Wait until this fetch is cancelled.
    ///
    /// Transports that can abort a request early select on this.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.cancel_rx.borrow_and_update() {
                return;
            }
            if self.cancel_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Complete the fetch, populating the cache unless it was cancelled.
    ///
    /// Returns false when the result was discarded. The cancellation check
    /// and the write happen under one lock, so an awaited
    /// [`CacheStore::cancel`] strictly precedes any later completion.
    pub fn complete<T: CachedValue>(mut self, value: T) -> bool {
        let Some(key) = self.key.take() else {
            return false;
        };
        let mut inner = self.store.inner.write();
        inner.unregister_fetch(&key, &self.inflight);
        if *self.cancel_rx.borrow() {
            drop(inner);
            trace!(%key, "cache: cancelled fetch result discarded");
            return false;
        }
        let created = !inner.entries.contains_key(&key);
        inner.entries.insert(key.clone(), Box::new(value));
        inner.reindex(&key, true);
        drop(inner);
        trace!(%key, created, "cache: fetch completed");
        self.store.broadcast(if created {
            CacheEvent::EntryPopulated { key }
        } else {
            CacheEvent::EntryUpdated { key }
        });
        true
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut inner = self.store.inner.write();
            inner.unregister_fetch(&key, &self.inflight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{rewrite_leaf, visit_leaf};

    #[derive(Debug, Clone, PartialEq)]
    struct Tag {
        id: String,
        label: String,
    }

    impl Entity for Tag {
        const KIND: &'static str = "tag";

        fn id(&self) -> &str {
            &self.id
        }
    }

    impl Normalize for Tag {
        fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
            visit_leaf(self, visitor);
        }

        fn rewrite(
            &mut self,
            key: &EntityKey,
            patch: &mut dyn FnMut(&mut dyn std::any::Any),
        ) -> bool {
            rewrite_leaf(self, key, patch)
        }
    }

    fn tag(id: &str, label: &str) -> Tag {
        Tag {
            id: id.to_string(),
            label: label.to_string(),
        }
    }

    #[test]
    fn update_never_creates_entries() {
        let store = CacheStore::new();
        let key = QueryKey::of(["tags", "t1"]);
        assert!(!store.update::<Tag>(&key, |t| t.label = "x".to_string()));
        assert!(!store.contains(&key));
    }

    #[test]
    fn populate_registers_reverse_index() {
        let store = CacheStore::new();
        store.populate(QueryKey::of(["tags"]), vec![tag("t1", "a"), tag("t2", "b")]);
        assert_eq!(store.entity::<Tag>("t1").map(|t| t.label), Some("a".into()));
        assert_eq!(store.entity_count(), 2);
    }

    #[test]
    fn evicting_last_embedding_drops_canonical() {
        let store = CacheStore::new();
        let list = QueryKey::of(["tags"]);
        let single = QueryKey::of(["tags", "t1"]);
        store.populate(list.clone(), vec![tag("t1", "a")]);
        store.populate(single.clone(), tag("t1", "a"));

        assert!(store.remove(&list));
        assert!(store.entity::<Tag>("t1").is_some());

        assert!(store.remove(&single));
        assert!(store.entity::<Tag>("t1").is_none());
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn set_on_unknown_entity_is_empty_edit() {
        let store = CacheStore::new();
        let edit = store.set_entity::<Tag>("ghost", |t| t.label = "x".to_string());
        assert!(edit.is_empty());
        store.rollback(edit);
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn wrong_type_reads_as_absent() {
        let store = CacheStore::new();
        let key = QueryKey::of(["tags"]);
        store.populate(key.clone(), vec![tag("t1", "a")]);
        assert!(store.get::<Tag>(&key).is_none());
        assert!(store.get::<Vec<Tag>>(&key).is_some());
    }

    #[tokio::test]
    async fn cancel_discards_late_completion() {
        let store = CacheStore::new();
        let key = QueryKey::of(["tags"]);
        let guard = store.begin_fetch(key.clone());
        assert_eq!(store.inflight_count(), 1);

        store.cancel(&QueryKey::of(["tags"])).await;
        assert!(guard.is_cancelled());
        assert!(!guard.complete(vec![tag("t1", "stale")]));
        assert!(!store.contains(&key));
        assert_eq!(store.inflight_count(), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_after_completion() {
        let store = CacheStore::new();
        let key = QueryKey::of(["tags"]);
        let guard = store.begin_fetch(key.clone());
        assert!(guard.complete(vec![tag("t1", "fresh")]));

        // The fetch already finished; cancelling again must not disturb it.
        store.cancel(&key).await;
        store.cancel(&key).await;
        assert!(store.get::<Vec<Tag>>(&key).is_some());
    }

    #[tokio::test]
    async fn dropping_guard_unregisters() {
        let store = CacheStore::new();
        let guard = store.begin_fetch(QueryKey::of(["tags"]));
        drop(guard);
        assert_eq!(store.inflight_count(), 0);
    }

    #[tokio::test]
    async fn events_fire_for_entity_writes() {
        let store = CacheStore::new();
        let mut events = store.subscribe();
        store.populate(QueryKey::of(["tags"]), vec![tag("t1", "a")]);
        store.set_entity::<Tag>("t1", |t| t.label = "b".to_string());

        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::EntryPopulated {
                key: QueryKey::of(["tags"])
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::EntryUpdated {
                key: QueryKey::of(["tags"])
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::EntityWritten {
                entity: EntityKey::new("tag", "t1")
            }
        );
    }
}
