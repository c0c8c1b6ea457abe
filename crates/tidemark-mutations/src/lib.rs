//! Optimistic mutation protocol over the tidemark cache.
//!
//! This crate provides the mutation half of tidemark:
//!
//! - **Coordinator**: begin/commit/rollback lifecycle for speculative edits,
//!   with cancel-before-begin fencing and per-scope FIFO serialization
//! - **Pending registry**: client-id to server-id correlation for dependent
//!   actions issued before the server confirms
//! - **List helpers**: the placeholder pattern over flat and paginated lists
//! - **Retry state**: failed optimistic creates held for resend
//! - **Flows**: the favorites/reactions/notifications/messages/timeline
//!   recipes the rest of the app calls

pub mod coordinator;
pub mod error;
pub mod flows;
pub mod lists;
pub mod pending;
pub mod records;
pub mod retry;

pub use coordinator::MutationCoordinator;
pub use error::MutationError;
pub use lists::{ItemList, ListIndex, ListRemoval};
pub use pending::{OPTIMISTIC_ID_PREFIX, PendingMutations, mint_client_id};
pub use retry::{RetryRegistry, RetryState, RetryStatus};
