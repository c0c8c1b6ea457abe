//! Entity normalization: canonical identity and fan-out rewriting.
//!
//! Every type stored in the cache declares its embedded entities through the
//! [`Normalize`] trait. The store walks those declarations to maintain a
//! reverse index from entity identity to embedding queries, which is what
//! lets a single canonical write reach every view of the entity without the
//! writing feature knowing which screens currently display it.

use std::any::Any;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::key::QueryKey;
use crate::pagination::{Page, Paginated};

/// Identity of a normalized entity: static kind plus instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Static type discriminator, e.g. `"project"`.
    pub kind: &'static str,
    /// Stable instance identifier.
    pub id: String,
}

impl EntityKey {
    /// Build a key for the given kind and id.
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A uniquely identified record whose copies may be embedded in many query
/// results.
///
/// Any query result containing an entity is a view, not a second source of
/// truth: canonical fields are written through the store's normalizer, which
/// rewrites every embedded copy.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Static type discriminator, unique per entity type.
    const KIND: &'static str;

    /// Stable instance identifier.
    fn id(&self) -> &str;

    /// Identity of this entity instance.
    fn entity_key(&self) -> EntityKey {
        EntityKey::new(Self::KIND, self.id())
    }
}

/// Object-safe view of an entity used by the store internals.
pub trait AnyEntity: Send + Sync {
    /// Identity of this entity instance.
    fn entity_key(&self) -> EntityKey;
    /// Downcast access to the concrete entity.
    fn as_any(&self) -> &dyn Any;
    /// Clone into a boxed trait object.
    fn clone_box(&self) -> Box<dyn AnyEntity>;
}

impl<E: Entity> AnyEntity for E {
    fn entity_key(&self) -> EntityKey {
        Entity::entity_key(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn AnyEntity> {
        Box::new(self.clone())
    }
}

/// Declares which parts of a cacheable value are entities.
///
/// `visit` enumerates every embedded entity so the store can maintain its
/// reverse index; `rewrite` patches every embedded copy of one entity in
/// place, which is how a canonical write fans out to all views. Values with
/// no embedded entities implement both as no-ops.
pub trait Normalize: Send + Sync + 'static {
    /// Invoke `visitor` for every entity embedded in this value.
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity));

    /// Rewrite embedded copies of the entity at `key` via `patch`.
    ///
    /// Returns true when at least one copy matched.
    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool;
}

/// Visit a leaf entity.
pub fn visit_leaf<E: Entity>(entity: &E, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
    visitor(entity);
}

/// Rewrite a leaf entity in place when `key` addresses it.
pub fn rewrite_leaf<E: Entity>(
    entity: &mut E,
    key: &EntityKey,
    patch: &mut dyn FnMut(&mut dyn Any),
) -> bool {
    if E::KIND == key.kind && entity.id() == key.id {
        patch(entity);
        true
    } else {
        false
    }
}

impl<T: Normalize> Normalize for Vec<T> {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        for item in self {
            item.visit(visitor);
        }
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        let mut hit = false;
        for item in self {
            hit |= item.rewrite(key, patch);
        }
        hit
    }
}

impl<T: Normalize> Normalize for Option<T> {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        if let Some(value) = self {
            value.visit(visitor);
        }
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        match self {
            Some(value) => value.rewrite(key, patch),
            None => false,
        }
    }
}

impl<T: Normalize> Normalize for Page<T> {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        self.items.visit(visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        self.items.rewrite(key, patch)
    }
}

impl<T: Normalize> Normalize for Paginated<T> {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        self.pages.visit(visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        self.pages.rewrite(key, patch)
    }
}

/// Type-erased cacheable value: normalizable, cloneable, downcastable.
pub trait CachedValue: Normalize {
    /// Downcast access to the concrete value.
    fn as_any(&self) -> &dyn Any;
    /// Mutable downcast access to the concrete value.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Clone into a boxed trait object.
    fn clone_box(&self) -> Box<dyn CachedValue>;
}

impl<T: Normalize + Clone> CachedValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn CachedValue> {
        Box::new(self.clone())
    }
}

/// Reversible snapshot of one optimistic edit.
///
/// Holds the exact previous value of every cache entry the edit touched,
/// plus the previous canonical entity snapshot, so a failed mutation can be
/// undone to pre-edit state rather than best-effort merged.
pub struct OptimisticEdit {
    pub(crate) entity: EntityKey,
    pub(crate) previous_entity: Option<Box<dyn AnyEntity>>,
    pub(crate) previous: Vec<(QueryKey, Box<dyn CachedValue>)>,
    pub(crate) touched: Vec<QueryKey>,
    pub(crate) created_at: DateTime<Utc>,
}

impl OptimisticEdit {
    pub(crate) fn new(
        entity: EntityKey,
        previous_entity: Option<Box<dyn AnyEntity>>,
        previous: Vec<(QueryKey, Box<dyn CachedValue>)>,
        touched: Vec<QueryKey>,
    ) -> Self {
        Self {
            entity,
            previous_entity,
            previous,
            touched,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn empty(entity: EntityKey) -> Self {
        Self::new(entity, None, Vec::new(), Vec::new())
    }

    /// Identity of the edited entity.
    pub fn entity(&self) -> &EntityKey {
        &self.entity
    }

    /// Keys of every cache entry this edit touched.
    pub fn touched_keys(&self) -> &[QueryKey] {
        &self.touched
    }

    /// Whether the edit applied to anything at all.
    ///
    /// Empty edits come from writes to entities the cache has never seen;
    /// rolling one back is a no-op.
    pub fn is_empty(&self) -> bool {
        self.previous_entity.is_none() && self.previous.is_empty()
    }

    /// When the edit was applied.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Debug for OptimisticEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticEdit")
            .field("entity", &self.entity)
            .field("touched", &self.touched)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
