//! Node Type Registry
//!
//! Holds built-in and stored node type definitions, resolves inheritance, and
//! answers the two questions the rest of the crate asks:
//!
//! - Which types are subtypes of X? (query compiler, via [`NodeTypeLookup`])
//! - What is the merged definition of primary type P plus mixins M? (node
//!   processor, via [`NodeTypeRegistry::effective`])
//!
//! Built-in types can never be overwritten. Stored definitions are loaded by
//! the store into a session-scoped registry.

use crate::db::StoreError;
use crate::models::{
    path, ChildNodeDefinition, NodeTypeDefinition, OnParentVersion, PropertyDefinition,
    PropertyType, RESIDUAL_NAME,
};
use crate::query::NodeTypeLookup;
use std::collections::{BTreeMap, BTreeSet};

pub const NT_BASE: &str = "nt:base";
pub const NT_UNSTRUCTURED: &str = "nt:unstructured";
pub const MIX_REFERENCEABLE: &str = "mix:referenceable";

/// Merged view of a primary type, its mixins and all their supertypes
#[derive(Debug, Clone, Default)]
pub struct EffectiveNodeType {
    /// Every type name contributing to this view
    pub type_names: BTreeSet<String>,
    pub property_definitions: Vec<PropertyDefinition>,
    pub child_node_definitions: Vec<ChildNodeDefinition>,
    pub orderable_child_nodes: bool,
}

impl EffectiveNodeType {
    pub fn includes(&self, type_name: &str) -> bool {
        self.type_names.contains(type_name)
    }

    /// Named definition for `name`, falling back to a residual one
    pub fn property_definition(&self, name: &str) -> Option<&PropertyDefinition> {
        self.property_definitions
            .iter()
            .find(|d| d.name == name)
            .or_else(|| self.property_definitions.iter().find(|d| d.is_residual()))
    }

    pub fn child_node_definition(&self, name: &str) -> Option<&ChildNodeDefinition> {
        self.child_node_definitions
            .iter()
            .find(|d| d.name == name)
            .or_else(|| self.child_node_definitions.iter().find(|d| d.is_residual()))
    }
}

#[derive(Debug, Clone)]
pub struct NodeTypeRegistry {
    definitions: BTreeMap<String, NodeTypeDefinition>,
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTypeRegistry {
    /// Registry holding the built-in types only
    pub fn new() -> Self {
        let definitions = builtin_node_types()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self { definitions }
    }

    /// Built-ins plus stored definitions
    pub fn with_definitions(stored: Vec<NodeTypeDefinition>) -> Self {
        let mut registry = Self::new();
        for definition in stored {
            if !is_builtin_type(&definition.name) {
                registry.definitions.insert(definition.name.clone(), definition);
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&NodeTypeDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Definitions for `names`, or every definition when `names` is empty
    pub fn definitions(&self, names: &[String]) -> Result<Vec<NodeTypeDefinition>, StoreError> {
        if names.is_empty() {
            return Ok(self.definitions.values().cloned().collect());
        }
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| StoreError::not_found(format!("node type '{}'", name)))
            })
            .collect()
    }

    /// Validate a registration batch against this registry
    ///
    /// Supertypes may be defined earlier in the same batch.
    pub fn check_registration(
        &self,
        definitions: &[NodeTypeDefinition],
        allow_update: bool,
    ) -> Result<(), StoreError> {
        let batch: BTreeSet<&str> = definitions.iter().map(|d| d.name.as_str()).collect();

        for definition in definitions {
            if !path::is_valid_name(&definition.name) {
                return Err(StoreError::value_format(format!(
                    "invalid node type name '{}'",
                    definition.name
                )));
            }
            if is_builtin_type(&definition.name) {
                return Err(StoreError::already_exists(format!(
                    "built-in node type '{}'",
                    definition.name
                )));
            }
            if self.contains(&definition.name) && !allow_update {
                return Err(StoreError::already_exists(format!(
                    "node type '{}'",
                    definition.name
                )));
            }
            for supertype in &definition.supertypes {
                if supertype == &definition.name {
                    return Err(StoreError::constraint(format!(
                        "node type '{}' cannot inherit from itself",
                        definition.name
                    )));
                }
                if !self.contains(supertype) && !batch.contains(supertype.as_str()) {
                    return Err(StoreError::constraint(format!(
                        "node type '{}' has unknown supertype '{}'",
                        definition.name, supertype
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, definition: NodeTypeDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    /// `name` plus all transitive supertypes; primary types implicitly extend `nt:base`
    pub fn supertype_closure(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(definition) = self.get(&current) {
                stack.extend(definition.supertypes.iter().cloned());
                if !definition.is_mixin && current != NT_BASE {
                    stack.push(NT_BASE.to_string());
                }
            }
        }
        seen
    }

    pub fn is_subtype_of(&self, name: &str, ancestor: &str) -> bool {
        self.supertype_closure(name).contains(ancestor)
    }

    /// Merge a primary type and mixins into one effective definition
    pub fn effective(
        &self,
        primary_type: &str,
        mixins: &[String],
    ) -> Result<EffectiveNodeType, StoreError> {
        let mut effective = EffectiveNodeType::default();

        for root in std::iter::once(primary_type).chain(mixins.iter().map(String::as_str)) {
            if !self.contains(root) {
                return Err(StoreError::constraint(format!("unknown node type '{}'", root)));
            }
            effective.type_names.extend(self.supertype_closure(root));
        }

        for name in &effective.type_names {
            let Some(definition) = self.get(name) else {
                continue;
            };
            effective.orderable_child_nodes |= definition.orderable_child_nodes;
            for property in &definition.property_definitions {
                if property.is_residual()
                    || !effective
                        .property_definitions
                        .iter()
                        .any(|p| p.name == property.name)
                {
                    effective.property_definitions.push(property.clone());
                }
            }
            for child in &definition.child_node_definitions {
                if child.is_residual()
                    || !effective
                        .child_node_definitions
                        .iter()
                        .any(|c| c.name == child.name)
                {
                    effective.child_node_definitions.push(child.clone());
                }
            }
        }

        Ok(effective)
    }
}

impl NodeTypeLookup for NodeTypeRegistry {
    fn subtypes(&self, node_type: &str) -> Vec<String> {
        self.definitions
            .keys()
            .filter(|name| name.as_str() != node_type && self.is_subtype_of(name, node_type))
            .cloned()
            .collect()
    }
}

pub fn is_builtin_type(name: &str) -> bool {
    BUILTIN_TYPE_NAMES.contains(&name)
}

const BUILTIN_TYPE_NAMES: [&str; 10] = [
    "nt:base",
    "nt:unstructured",
    "nt:hierarchyNode",
    "nt:folder",
    "nt:file",
    "nt:resource",
    "mix:referenceable",
    "mix:created",
    "mix:lastModified",
    "mix:mimeType",
];

fn builtin_node_types() -> Vec<NodeTypeDefinition> {
    let protected_auto = |name: &str, property_type: PropertyType| {
        PropertyDefinition::new(name, property_type)
            .auto_created()
            .protected()
    };

    vec![
        NodeTypeDefinition::new(NT_BASE)
            .abstract_type()
            .with_property(
                protected_auto("jcr:primaryType", PropertyType::Name)
                    .mandatory()
                    .with_on_parent_version(OnParentVersion::Compute),
            )
            .with_property(
                PropertyDefinition::new("jcr:mixinTypes", PropertyType::Name)
                    .protected()
                    .multiple()
                    .with_on_parent_version(OnParentVersion::Compute),
            ),
        NodeTypeDefinition::new(NT_UNSTRUCTURED)
            .with_supertypes(&[NT_BASE])
            .orderable()
            .with_property(PropertyDefinition::new(RESIDUAL_NAME, PropertyType::String))
            .with_property(PropertyDefinition::new(RESIDUAL_NAME, PropertyType::String).multiple())
            .with_child(ChildNodeDefinition::new(RESIDUAL_NAME).with_default_type(NT_UNSTRUCTURED)),
        NodeTypeDefinition::new("nt:hierarchyNode")
            .abstract_type()
            .with_supertypes(&[NT_BASE, "mix:created"]),
        NodeTypeDefinition::new("nt:folder")
            .with_supertypes(&["nt:hierarchyNode"])
            .with_child(ChildNodeDefinition::new(RESIDUAL_NAME).with_required_types(&["nt:hierarchyNode"])),
        NodeTypeDefinition::new("nt:file")
            .with_supertypes(&["nt:hierarchyNode"])
            .with_primary_item("jcr:content")
            .with_child(ChildNodeDefinition::new("jcr:content").mandatory()),
        NodeTypeDefinition::new("nt:resource")
            .with_supertypes(&[NT_BASE, "mix:mimeType", "mix:lastModified"])
            .with_primary_item("jcr:data")
            .with_property(PropertyDefinition::new("jcr:data", PropertyType::Binary).mandatory()),
        NodeTypeDefinition::new(MIX_REFERENCEABLE).mixin().with_property(
            protected_auto("jcr:uuid", PropertyType::String)
                .mandatory()
                .with_on_parent_version(OnParentVersion::Initialize),
        ),
        NodeTypeDefinition::new("mix:created")
            .mixin()
            .with_property(protected_auto("jcr:created", PropertyType::Date))
            .with_property(protected_auto("jcr:createdBy", PropertyType::String)),
        NodeTypeDefinition::new("mix:lastModified")
            .mixin()
            .with_property(PropertyDefinition::new("jcr:lastModified", PropertyType::Date).auto_created())
            .with_property(PropertyDefinition::new("jcr:lastModifiedBy", PropertyType::String).auto_created()),
        NodeTypeDefinition::new("mix:mimeType")
            .mixin()
            .with_property(PropertyDefinition::new("jcr:mimeType", PropertyType::String))
            .with_property(PropertyDefinition::new("jcr:encoding", PropertyType::String)),
    ]
}
