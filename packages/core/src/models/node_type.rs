//! Node Type Definitions
//!
//! A node type names the properties and child nodes a node may or must carry.
//! Types inherit from their declared supertypes; the registry in
//! `services::node_types` computes the effective (merged) definition.
//!
//! The name `*` declares a residual definition that matches any name.

use crate::models::property::{PropertyType, PropertyValue};
use serde::{Deserialize, Serialize};

/// Name that marks a residual property or child definition
pub const RESIDUAL_NAME: &str = "*";

/// Action taken on a child item when its parent is versioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OnParentVersion {
    #[default]
    Copy,
    Version,
    Initialize,
    Compute,
    Ignore,
    Abort,
}

impl OnParentVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnParentVersion::Copy => "COPY",
            OnParentVersion::Version => "VERSION",
            OnParentVersion::Initialize => "INITIALIZE",
            OnParentVersion::Compute => "COMPUTE",
            OnParentVersion::Ignore => "IGNORE",
            OnParentVersion::Abort => "ABORT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "COPY" => Some(OnParentVersion::Copy),
            "VERSION" => Some(OnParentVersion::Version),
            "INITIALIZE" => Some(OnParentVersion::Initialize),
            "COMPUTE" => Some(OnParentVersion::Compute),
            "IGNORE" => Some(OnParentVersion::Ignore),
            "ABORT" => Some(OnParentVersion::Abort),
            _ => None,
        }
    }
}

/// Declared property of a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub required_type: PropertyType,
    pub mandatory: bool,
    pub auto_created: bool,
    pub protected: bool,
    pub multiple: bool,
    pub on_parent_version: OnParentVersion,
    pub fulltext_searchable: bool,
    pub query_orderable: bool,
    pub default_values: Vec<PropertyValue>,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<String>, required_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            required_type,
            mandatory: false,
            auto_created: false,
            protected: false,
            multiple: false,
            on_parent_version: OnParentVersion::Copy,
            fulltext_searchable: true,
            query_orderable: true,
            default_values: Vec::new(),
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn auto_created(mut self) -> Self {
        self.auto_created = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn with_default(mut self, values: Vec<PropertyValue>) -> Self {
        self.default_values = values;
        self
    }

    pub fn with_on_parent_version(mut self, action: OnParentVersion) -> Self {
        self.on_parent_version = action;
        self
    }

    pub fn is_residual(&self) -> bool {
        self.name == RESIDUAL_NAME
    }
}

/// Declared child node of a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildNodeDefinition {
    pub name: String,
    pub required_primary_types: Vec<String>,
    pub default_primary_type: Option<String>,
    pub mandatory: bool,
    pub auto_created: bool,
    pub protected: bool,
    pub on_parent_version: OnParentVersion,
}

impl ChildNodeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_primary_types: vec!["nt:base".to_string()],
            default_primary_type: None,
            mandatory: false,
            auto_created: false,
            protected: false,
            on_parent_version: OnParentVersion::Copy,
        }
    }

    pub fn with_required_types(mut self, types: &[&str]) -> Self {
        self.required_primary_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_default_type(mut self, type_name: impl Into<String>) -> Self {
        self.default_primary_type = Some(type_name.into());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn auto_created(mut self) -> Self {
        self.auto_created = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn is_residual(&self) -> bool {
        self.name == RESIDUAL_NAME
    }
}

/// A named node type with its own (non-inherited) declarations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeDefinition {
    pub name: String,
    pub supertypes: Vec<String>,
    pub is_abstract: bool,
    pub is_mixin: bool,
    pub queryable: bool,
    pub orderable_child_nodes: bool,
    pub primary_item: Option<String>,
    pub property_definitions: Vec<PropertyDefinition>,
    pub child_node_definitions: Vec<ChildNodeDefinition>,
}

impl NodeTypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supertypes: Vec::new(),
            is_abstract: false,
            is_mixin: false,
            queryable: true,
            orderable_child_nodes: false,
            primary_item: None,
            property_definitions: Vec::new(),
            child_node_definitions: Vec::new(),
        }
    }

    pub fn with_supertypes(mut self, supertypes: &[&str]) -> Self {
        self.supertypes = supertypes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn mixin(mut self) -> Self {
        self.is_mixin = true;
        self
    }

    pub fn orderable(mut self) -> Self {
        self.orderable_child_nodes = true;
        self
    }

    pub fn with_primary_item(mut self, name: impl Into<String>) -> Self {
        self.primary_item = Some(name.into());
        self
    }

    pub fn with_property(mut self, definition: PropertyDefinition) -> Self {
        self.property_definitions.push(definition);
        self
    }

    pub fn with_child(mut self, definition: ChildNodeDefinition) -> Self {
        self.child_node_definitions.push(definition);
        self
    }
}
