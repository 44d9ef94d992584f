//! Database Layer
//!
//! - [`DatabaseService`] owns the libsql database, runs the idempotent DDL and
//!   seeds workspaces with their root node
//! - [`NodeStore`] is the storage contract every backend implements
//! - [`RelationalStore`] implements it over flat path-indexed rows
//! - [`CachedStore`] decorates any [`NodeStore`] with in-process caches

mod cached_store;
mod database;
mod error;
mod node_store;
mod relational_store;

pub use cached_store::CachedStore;
pub use database::{DatabaseService, DEFAULT_WORKSPACE};
pub use error::{BackendFailureKind, ErrorKind, StoreError};
pub use node_store::NodeStore;
pub use relational_store::RelationalStore;
