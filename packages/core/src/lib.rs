//! Arbor Core
//!
//! Typed content tree storage on a relational backend. Nodes live at
//! hierarchical paths inside named workspaces; their properties are kept as
//! one serialized markup blob per row, validated against node type
//! definitions on write.
//!
//! # Modules
//!
//! - [`models`] - Paths, property values, nodes and node type definitions
//! - [`codec`] - Property blob encoding and decoding
//! - [`query`] - Query object model and its SQL compiler
//! - [`services`] - Namespace and node type registries, write validation
//! - [`db`] - Node store contract, relational backend and cache overlay
//! - [`config`] - Store configuration
//! - [`logging`] - Tracing subscriber setup

pub mod codec;
pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod query;
pub mod services;

// Re-export commonly used types
pub use config::{CacheConfig, StoreConfig};
pub use db::{CachedStore, ErrorKind, NodeStore, RelationalStore, StoreError};
pub use models::*;
