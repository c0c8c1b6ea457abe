//! Optimistic mutation lifecycle.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use tidemark_store::{CacheStore, Entity, OptimisticEdit, QueryKey};

/// Coordinates the local half of optimistic mutations: capture prior state,
/// apply a speculative edit synchronously, and later commit the server
/// payload or roll back exactly.
///
/// Mutations that could race for the same affordance (rapid
/// favorite/unfavorite clicks) share a scope id; holding the scope guard
/// across the begin-to-settle cycle serializes them in submission order, so
/// a second speculative edit only applies after the first committed or
/// rolled back.
pub struct MutationCoordinator {
    store: Arc<CacheStore>,
    scopes: DashMap<String, Arc<Mutex<()>>>,
}

impl MutationCoordinator {
    /// Create a coordinator over a shared store.
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            scopes: DashMap::new(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Acquire the serialization guard for `scope`.
    ///
    /// Guards are granted in FIFO order. Hold the guard across the whole
    /// begin-to-settle cycle.
    pub async fn scope(&self, scope: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .scopes
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        trace!(scope, "acquiring mutation scope");
        mutex.lock_owned().await
    }

    /// Cancel in-flight fetches for every key this mutation will touch.
    ///
    /// Await this before [`begin`](Self::begin): it is what keeps a stale
    /// response from overwriting the fresh optimistic value.
    pub async fn prepare(&self, keys: &[QueryKey]) {
        for key in keys {
            self.store.cancel(key).await;
        }
    }

    /// Apply a speculative local edit, returning its rollback record.
    #[tracing::instrument(skip(self, update), fields(kind = E::KIND))]
    pub fn begin<E: Entity>(&self, id: &str, update: impl FnOnce(&mut E)) -> OptimisticEdit {
        self.store.set_entity(id, update)
    }

    /// Undo a speculative edit after its network call failed.
    pub fn rollback(&self, edit: OptimisticEdit) {
        self.store.rollback(edit);
    }

    /// Commit the authoritative server payload for an entity.
    ///
    /// The server value wins unconditionally over any still-pending
    /// speculative value.
    pub fn commit<E: Entity>(&self, server: E) {
        self.store.commit_entity(server);
    }

    /// Apply a server-derived partial update.
    ///
    /// Like [`commit`](Self::commit), for callers that only received the
    /// changed fields; no rollback snapshot is kept since the value is
    /// authoritative.
    pub fn commit_with<E: Entity>(&self, id: &str, update: impl FnOnce(&mut E)) {
        let _ = self.store.set_entity(id, update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn scope_guards_are_exclusive_and_fifo() {
        let coordinator = Arc::new(MutationCoordinator::new(CacheStore::new()));
        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();

        let first = coordinator.scope("favorites:p1").await;

        let second = {
            let coordinator = Arc::clone(&coordinator);
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let _guard = coordinator.scope("favorites:p1").await;
                order_tx.send("second").unwrap();
            })
        };
        // An unrelated scope must not serialize against this one.
        let third = {
            let coordinator = Arc::clone(&coordinator);
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let _guard = coordinator.scope("favorites:p2").await;
                order_tx.send("other-scope").unwrap();
            })
        };

        assert_eq!(order_rx.recv().await, Some("other-scope"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(first);
        assert_eq!(order_rx.recv().await, Some("second"));

        second.await.unwrap();
        third.await.unwrap();
    }
}
