//! Business Services
//!
//! Session-scoped registries and validation that sit between the node store
//! and the relational tables:
//!
//! - `NamespaceRegistry` - prefix to URI table with built-in protection
//! - `NodeTypeRegistry` - built-in and stored node type definitions
//! - `NodeProcessor` - node type validation and auto-created items on save

pub mod namespaces;
pub mod node_processor;
pub mod node_types;

pub use namespaces::{is_builtin_prefix, NamespaceRegistry, BUILTIN_NAMESPACES};
pub use node_processor::{NodeProcessor, ProcessedNode};
pub use node_types::{
    is_builtin_type, EffectiveNodeType, NodeTypeRegistry, MIX_REFERENCEABLE, NT_BASE,
    NT_UNSTRUCTURED,
};
