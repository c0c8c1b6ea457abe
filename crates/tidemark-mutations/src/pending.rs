//! Pending mutation correlation.
//!
//! Fast repeated user actions can reference a record before the server has
//! assigned it an id: removing a reaction that was just optimistically
//! added, deleting a comment that is still posting. The registry correlates
//! the client-generated temporary id with the eventual server id so the
//! dependent call can wait for the real one instead of operating on the
//! temporary id.

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::error::MutationError;

/// Prefix applied to client-generated optimistic ids.
pub const OPTIMISTIC_ID_PREFIX: &str = "temp";

/// Mint a fresh client-generated id.
pub fn mint_client_id() -> String {
    format!("{OPTIMISTIC_ID_PREFIX}-{}", Uuid::new_v4())
}

type Settlement = Option<Result<String, MutationError>>;

struct PendingEntry {
    tx: watch::Sender<Settlement>,
}

/// Registry correlating client-generated mutation ids with their eventual
/// server-assigned ids.
///
/// A mutation settles exactly once: the first `resolve` or `reject` wins
/// and every later settlement is a no-op, since network retries and
/// duplicate event delivery must not crash dependent awaiters.
#[derive(Default)]
pub struct PendingMutations {
    entries: DashMap<String, PendingEntry>,
}

impl PendingMutations {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unsettled mutation under `client_id`.
    pub fn create(&self, client_id: impl Into<String>) {
        let client_id = client_id.into();
        let (tx, _rx) = watch::channel(None);
        if self
            .entries
            .insert(client_id.clone(), PendingEntry { tx })
            .is_some()
        {
            warn!(%client_id, "pending mutation re-registered; prior awaiters see it as dropped");
        }
        trace!(%client_id, "pending mutation registered");
    }

    /// Whether `client_id` is registered, settled or not.
    pub fn contains(&self, client_id: &str) -> bool {
        self.entries.contains_key(client_id)
    }

    /// Settle `client_id` with the server-assigned id.
    ///
    /// Settling an already-settled or unknown id is a no-op.
    pub fn resolve(&self, client_id: &str, server_id: impl Into<String>) {
        self.settle(client_id, Ok(server_id.into()));
    }

    /// Settle `client_id` with a failure, propagated to every awaiter.
    pub fn reject(&self, client_id: &str, error: MutationError) {
        self.settle(client_id, Err(error));
    }

    fn settle(&self, client_id: &str, outcome: Result<String, MutationError>) {
        let Some(entry) = self.entries.get(client_id) else {
            warn!(%client_id, "settlement for unknown pending mutation ignored");
            return;
        };
        // Only the first settlement lands; later ones observe Some and
        // leave the channel untouched.
        let settled_now = entry.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome.clone());
            true
        });
        if settled_now {
            trace!(%client_id, ok = outcome.is_ok(), "pending mutation settled");
        } else {
            trace!(%client_id, "pending mutation already settled, ignoring");
        }
    }

    /// Wait for the server id correlated with `client_id`.
    ///
    /// Resolves immediately when already settled. Dropping the returned
    /// future unregisters this awaiter without settling the shared channel
    /// for anyone else.
    pub async fn wait(&self, client_id: &str) -> Result<String, MutationError> {
        let mut rx = match self.entries.get(client_id) {
            Some(entry) => entry.tx.subscribe(),
            None => return Err(MutationError::UnknownClient(client_id.to_string())),
        };
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(MutationError::Closed);
            }
        }
    }

    /// Drop the registration for `client_id`.
    pub fn forget(&self, client_id: &str) {
        self.entries.remove(client_id);
    }

    /// Number of registered mutations, settled or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
