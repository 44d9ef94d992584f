//! Data Models
//!
//! This module contains the core data structures used throughout Arbor:
//!
//! - `NodeData` - A node row as seen by the tree layer
//! - `Property` / `PropertyValue` - Typed, possibly multi-valued properties
//! - `NodeTypeDefinition` - Node type schemas with inheritable declarations
//! - `path` - Absolute path and qualified name arithmetic

mod node;
mod node_type;
pub mod path;
mod property;

pub use node::{Credentials, MoveOperation, NodeData, StoreOperation};
pub use node_type::{
    ChildNodeDefinition, NodeTypeDefinition, OnParentVersion, PropertyDefinition, RESIDUAL_NAME,
};
pub use property::{
    find_property, BinaryValue, Property, PropertyType, PropertyValue, DATE_FORMAT, MIXIN_TYPES,
    PRIMARY_TYPE, UUID,
};
