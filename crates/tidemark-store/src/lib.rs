//! Normalized entity cache for optimistic client UIs.
//!
//! This crate provides the storage half of tidemark:
//!
//! - **Cache store**: typed query results addressed by structured keys
//! - **Entity normalizer**: canonical `(kind, id)` snapshots with a reverse
//!   index, so one write fans out to every view embedding the entity
//! - **Fetch fencing**: in-flight fetch registration and cancellation so a
//!   stale response cannot clobber a fresh optimistic write
//! - **Update broadcast**: cache events for render-side invalidation
//!
//! The mutation protocol built on top (optimistic coordinator, pending
//! mutation registry, list helpers) lives in `tidemark-mutations`.

pub mod config;
pub mod key;
pub mod normalize;
pub mod pagination;
mod store;

pub use config::StoreConfig;
pub use key::{KeySegment, QueryKey};
pub use normalize::{AnyEntity, CachedValue, Entity, EntityKey, Normalize, OptimisticEdit};
pub use pagination::{Cursor, Page, Paginated};
pub use store::{CacheEvent, CacheStore, FetchGuard};
