//! Node Data Structures
//!
//! `NodeData` is what the store hands back to the tree layer: the decoded
//! property set of one row plus the names of its existing children in sibling
//! order. Child names are placeholders only; the caller resolves them lazily.
//!
//! Write batches are expressed as `StoreOperation` entries so that a single
//! save can mix inserts, in-place updates and tombstone syncs.
//!
//! # Examples
//!
//! ```rust
//! use arbor_core::models::{Property, StoreOperation};
//!
//! let op = StoreOperation::add(
//!     "/content/page",
//!     vec![Property::primary_type("nt:unstructured"), Property::string("title", "Home")],
//! );
//! assert_eq!(op.path(), "/content/page");
//! ```

use crate::models::path;
use crate::models::property::{find_property, Property, MIXIN_TYPES};
use serde::{Deserialize, Serialize};

/// A node as read from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Absolute path, unique per workspace
    pub path: String,

    /// Workspace-unique identifier (UUID text)
    pub identifier: String,

    /// Primary node type name
    pub primary_type: String,

    /// Decoded property set
    pub properties: Vec<Property>,

    /// Names of existing children in sort order
    pub children: Vec<String>,
}

impl NodeData {
    /// Last path segment (empty for root)
    pub fn name(&self) -> &str {
        path::node_name(&self.path)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        find_property(&self.properties, name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Mixin type names from `jcr:mixinTypes`
    pub fn mixin_types(&self) -> Vec<String> {
        self.property(MIXIN_TYPES)
            .map(|p| p.str_values().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// One entry of a write batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreOperation {
    /// Insert a new node; the path must be free
    Add {
        path: String,
        properties: Vec<Property>,
    },

    /// Replace the property set of an existing node, or insert when absent
    Update {
        path: String,
        properties: Vec<Property>,
    },

    /// Sync the tombstone properties of a node that is itself deleted
    Deleted {
        path: String,
        properties: Vec<Property>,
    },
}

impl StoreOperation {
    pub fn add(path: impl Into<String>, properties: Vec<Property>) -> Self {
        Self::Add {
            path: path.into(),
            properties,
        }
    }

    pub fn update(path: impl Into<String>, properties: Vec<Property>) -> Self {
        Self::Update {
            path: path.into(),
            properties,
        }
    }

    pub fn deleted(path: impl Into<String>, properties: Vec<Property>) -> Self {
        Self::Deleted {
            path: path.into(),
            properties,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Update { path, .. } | Self::Deleted { path, .. } => {
                path
            }
        }
    }

    pub fn properties(&self) -> &[Property] {
        match self {
            Self::Add { properties, .. }
            | Self::Update { properties, .. }
            | Self::Deleted { properties, .. } => properties,
        }
    }
}

/// Source and destination of a subtree move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOperation {
    pub src: String,
    pub dst: String,
}

impl MoveOperation {
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// Caller identity, used only to stamp created-by/last-modified-by properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("anonymous")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::property::PropertyType;

    #[test]
    fn test_node_accessors() {
        let node = NodeData {
            path: "/a/b".to_string(),
            identifier: "id-1".to_string(),
            primary_type: "nt:unstructured".to_string(),
            properties: vec![
                Property::string("title", "B"),
                Property::mixin_types(&["mix:referenceable", "mix:created"]),
            ],
            children: vec![],
        };

        assert_eq!(node.name(), "b");
        assert!(node.has_property("title"));
        assert!(!node.has_property("missing"));
        assert_eq!(
            node.mixin_types(),
            vec!["mix:referenceable".to_string(), "mix:created".to_string()]
        );
        assert_eq!(
            node.property(MIXIN_TYPES).map(|p| p.property_type),
            Some(PropertyType::Name)
        );
    }

    #[test]
    fn test_store_operation_accessors() {
        let op = StoreOperation::deleted("/gone", vec![Property::long("n", 1)]);
        assert_eq!(op.path(), "/gone");
        assert_eq!(op.properties().len(), 1);
    }
}
