//! Retry state for failed optimistic creates.
//!
//! A failed send keeps its optimistic row on screen with a retry
//! affordance. The registry holds the original request payload keyed by
//! client id so the resend goes out with exactly what the user submitted.

use dashmap::DashMap;
use tracing::trace;

/// Lifecycle of a tracked create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    /// The create is in flight.
    Pending,
    /// The create failed; the payload is held for resend.
    Failed,
}

/// One tracked create: its status plus the original request payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState<T> {
    pub status: RetryStatus,
    pub payload: T,
}

/// Client-id-keyed registry of in-flight optimistic creates.
pub struct RetryRegistry<T> {
    states: DashMap<String, RetryState<T>>,
}

impl<T: Clone + Send + Sync + 'static> RetryRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Track a new in-flight create.
    pub fn insert(&self, client_id: impl Into<String>, payload: T) {
        let client_id = client_id.into();
        trace!(%client_id, "retry: create tracked");
        self.states.insert(
            client_id,
            RetryState {
                status: RetryStatus::Pending,
                payload,
            },
        );
    }

    /// Mark a create failed, keeping its payload for resend.
    ///
    /// Returns false for unknown ids.
    pub fn mark_failed(&self, client_id: &str) -> bool {
        self.set_status(client_id, RetryStatus::Failed)
    }

    /// Mark a create in flight again after a retry was issued.
    pub fn mark_pending(&self, client_id: &str) -> bool {
        self.set_status(client_id, RetryStatus::Pending)
    }

    fn set_status(&self, client_id: &str, status: RetryStatus) -> bool {
        match self.states.get_mut(client_id) {
            Some(mut state) => {
                state.status = status;
                trace!(%client_id, ?status, "retry: status updated");
                true
            }
            None => false,
        }
    }

    /// Drop a confirmed create.
    pub fn remove(&self, client_id: &str) -> Option<RetryState<T>> {
        self.states.remove(client_id).map(|(_, state)| state)
    }

    /// Current state of one create.
    pub fn get(&self, client_id: &str) -> Option<RetryState<T>> {
        self.states.get(client_id).map(|state| state.clone())
    }

    /// Snapshot of every failed create, for a resend pass.
    pub fn failed(&self) -> Vec<(String, T)> {
        self.states
            .iter()
            .filter(|entry| entry.status == RetryStatus::Failed)
            .map(|entry| (entry.key().clone(), entry.payload.clone()))
            .collect()
    }

    /// Number of tracked creates.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for RetryRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_creates_are_held_for_resend() {
        let registry: RetryRegistry<String> = RetryRegistry::new();
        registry.insert("temp-1", "hello".to_string());
        registry.insert("temp-2", "world".to_string());

        assert!(registry.mark_failed("temp-1"));
        assert!(!registry.mark_failed("ghost"));

        let failed = registry.failed();
        assert_eq!(failed, vec![("temp-1".to_string(), "hello".to_string())]);

        assert!(registry.mark_pending("temp-1"));
        assert!(registry.failed().is_empty());
    }

    #[test]
    fn confirmed_creates_are_dropped() {
        let registry: RetryRegistry<u32> = RetryRegistry::new();
        registry.insert("temp-1", 7);
        assert_eq!(
            registry.remove("temp-1").map(|state| state.payload),
            Some(7)
        );
        assert!(registry.is_empty());
        assert!(registry.remove("temp-1").is_none());
    }
}
