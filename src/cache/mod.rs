//! Versioned response cache.
//!
//! Two namespaces per deploy version:
//! - Static, populated from a fixed route list at install time
//! - Runtime, filled opportunistically from successful same-origin fetches
//!
//! Entries never expire on their own. Stale data only goes away when a new
//! version activates and every namespace outside its set is purged.

mod lifecycle;
mod namespace;
mod storage;

pub use lifecycle::{CacheLifecycle, LifecycleState};
pub use namespace::{ActiveSet, CacheNamespace, CachedEntry, NamespaceKind, RequestKey};
pub use storage::{CacheStorage, SqliteStorage};
