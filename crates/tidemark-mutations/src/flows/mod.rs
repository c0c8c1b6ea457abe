//! Feature recipes built on the cache core.
//!
//! Each flow implements the local half of one mutation: the speculative
//! apply, the confirm path for the server payload, and the failure path.
//! The network call itself stays with the caller; flows only promise that
//! whatever the server answers, the cache converges.

pub mod favorites;
pub mod messages;
pub mod notifications;
pub mod reactions;
pub mod timeline;
