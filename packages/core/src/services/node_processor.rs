//! Node Processor
//!
//! Validates a node's property set against its effective node type before it
//! is written, and fills in what the type says must be there:
//!
//! - auto-created properties (`jcr:uuid`, `jcr:created`, `jcr:createdBy`,
//!   `jcr:lastModified`, `jcr:lastModifiedBy`, and any default-valued property)
//! - auto-created child nodes, returned as extra `Add` operations
//! - mandatory properties and child nodes
//! - Name/Path/URI value grammar and namespace prefixes

use crate::db::StoreError;
use crate::models::{
    path, Credentials, NodeData, Property, PropertyType, PropertyValue, StoreOperation,
    MIXIN_TYPES, PRIMARY_TYPE, UUID,
};
use crate::services::namespaces::NamespaceRegistry;
use crate::services::node_types::{EffectiveNodeType, NodeTypeRegistry, NT_UNSTRUCTURED};
use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Result of processing a new node
#[derive(Debug, Clone)]
pub struct ProcessedNode {
    pub primary_type: String,
    pub properties: Vec<Property>,
    /// Auto-created children to append to the batch
    pub child_operations: Vec<StoreOperation>,
}

const URI_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9+.\-]*:[^\s]*$";

fn uri_pattern() -> &'static Regex {
    static URI_REGEX: OnceLock<Regex> = OnceLock::new();
    URI_REGEX.get_or_init(|| Regex::new(URI_PATTERN).unwrap())
}

pub struct NodeProcessor<'a> {
    node_types: &'a NodeTypeRegistry,
    namespaces: &'a NamespaceRegistry,
    credentials: &'a Credentials,
}

impl<'a> NodeProcessor<'a> {
    pub fn new(
        node_types: &'a NodeTypeRegistry,
        namespaces: &'a NamespaceRegistry,
        credentials: &'a Credentials,
    ) -> Self {
        Self {
            node_types,
            namespaces,
            credentials,
        }
    }

    /// Validate and complete the properties of a node about to be inserted
    ///
    /// # Arguments
    ///
    /// * `node_path` - Absolute path of the new node
    /// * `identifier` - Identifier the row will carry
    /// * `properties` - Caller-supplied properties
    /// * `batch_paths` - Paths added by the same batch, so mandatory children
    ///   created later in the batch are accepted
    pub fn process_new(
        &self,
        node_path: &str,
        identifier: &str,
        mut properties: Vec<Property>,
        batch_paths: &HashSet<String>,
    ) -> Result<ProcessedNode, StoreError> {
        let primary_type = match properties.iter().find(|p| p.name == PRIMARY_TYPE) {
            Some(property) => property
                .first_str()
                .ok_or_else(|| StoreError::value_format(format!("{}: empty primary type", node_path)))?
                .to_string(),
            None => {
                properties.insert(0, Property::primary_type(NT_UNSTRUCTURED));
                NT_UNSTRUCTURED.to_string()
            }
        };
        let mixins = mixin_names(&properties);

        let definition = self.node_types.get(&primary_type).ok_or_else(|| {
            StoreError::constraint(format!("{}: unknown primary type '{}'", node_path, primary_type))
        })?;
        if definition.is_mixin || definition.is_abstract {
            return Err(StoreError::constraint(format!(
                "{}: '{}' cannot be used as a primary type",
                node_path, primary_type
            )));
        }
        for mixin in &mixins {
            match self.node_types.get(mixin) {
                Some(d) if d.is_mixin => {}
                _ => {
                    return Err(StoreError::constraint(format!(
                        "{}: '{}' is not a known mixin type",
                        node_path, mixin
                    )))
                }
            }
        }

        let effective = self.node_types.effective(&primary_type, &mixins)?;
        self.add_auto_created(node_path, identifier, &effective, &mut properties)?;
        self.check_mandatory(node_path, &effective, &properties)?;
        self.check_values(node_path, &effective, &properties)?;
        let child_operations = self.child_operations(node_path, &effective, batch_paths)?;

        Ok(ProcessedNode {
            primary_type,
            properties,
            child_operations,
        })
    }

    /// Validate the properties of an existing node being rewritten
    ///
    /// Value grammar and prefixes are checked; last-modified stamps are
    /// refreshed when the node's type carries them.
    pub fn process_update(
        &self,
        existing: &NodeData,
        mut properties: Vec<Property>,
    ) -> Result<Vec<Property>, StoreError> {
        let mixins = mixin_names(&properties);
        let effective = self.node_types.effective(&existing.primary_type, &mixins)?;

        if !properties.iter().any(|p| p.name == PRIMARY_TYPE) {
            properties.insert(0, Property::primary_type(existing.primary_type.clone()));
        }
        if effective.includes("mix:lastModified") {
            set_property(&mut properties, Property::single("jcr:lastModified", PropertyType::Date, now()));
            set_property(
                &mut properties,
                Property::string("jcr:lastModifiedBy", self.credentials.user_id.clone()),
            );
        }
        self.check_values(&existing.path, &effective, &properties)?;
        Ok(properties)
    }

    fn add_auto_created(
        &self,
        node_path: &str,
        identifier: &str,
        effective: &EffectiveNodeType,
        properties: &mut Vec<Property>,
    ) -> Result<(), StoreError> {
        for definition in &effective.property_definitions {
            if !definition.auto_created
                || definition.is_residual()
                || properties.iter().any(|p| p.name == definition.name)
            {
                continue;
            }

            let property = match definition.name.as_str() {
                UUID => Property::string(UUID, identifier),
                "jcr:created" | "jcr:lastModified" => {
                    Property::single(definition.name.clone(), PropertyType::Date, now())
                }
                "jcr:createdBy" | "jcr:lastModifiedBy" => {
                    Property::string(definition.name.clone(), self.credentials.user_id.clone())
                }
                _ if !definition.default_values.is_empty() => Property {
                    name: definition.name.clone(),
                    property_type: definition.required_type,
                    multiple: definition.multiple,
                    values: definition.default_values.clone(),
                },
                _ => {
                    return Err(StoreError::constraint(format!(
                        "{}: auto-created property '{}' has no default value",
                        node_path, definition.name
                    )))
                }
            };
            properties.push(property);
        }
        Ok(())
    }

    fn check_mandatory(
        &self,
        node_path: &str,
        effective: &EffectiveNodeType,
        properties: &[Property],
    ) -> Result<(), StoreError> {
        for definition in &effective.property_definitions {
            if definition.mandatory
                && !definition.is_residual()
                && !properties.iter().any(|p| p.name == definition.name)
            {
                return Err(StoreError::constraint(format!(
                    "{}: mandatory property '{}' is missing",
                    node_path, definition.name
                )));
            }
        }
        Ok(())
    }

    fn check_values(
        &self,
        node_path: &str,
        effective: &EffectiveNodeType,
        properties: &[Property],
    ) -> Result<(), StoreError> {
        for property in properties {
            if !path::is_valid_name(&property.name) {
                return Err(StoreError::value_format(format!(
                    "{}: invalid property name '{}'",
                    node_path, property.name
                )));
            }
            self.namespaces.check_name(&property.name)?;

            if let Some(definition) = effective.property_definition(&property.name) {
                if !definition.is_residual() && definition.required_type != property.property_type {
                    return Err(StoreError::constraint(format!(
                        "{}: property '{}' must be {}, got {}",
                        node_path, property.name, definition.required_type, property.property_type
                    )));
                }
            }

            for value in property.str_values() {
                match property.property_type {
                    PropertyType::Name => self.check_name_value(value)?,
                    PropertyType::Path => self.check_path_value(value)?,
                    PropertyType::Uri => {
                        if !uri_pattern().is_match(value) {
                            return Err(StoreError::value_format(format!(
                                "{}: '{}' is not a valid URI",
                                property.name, value
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn check_name_value(&self, value: &str) -> Result<(), StoreError> {
        if !path::is_valid_name(value) {
            return Err(StoreError::value_format(format!("'{}' is not a valid name", value)));
        }
        self.namespaces.check_name(value)
    }

    fn check_path_value(&self, value: &str) -> Result<(), StoreError> {
        if value.is_empty() {
            return Err(StoreError::value_format("empty path"));
        }
        if path::is_root(value) {
            return Ok(());
        }
        let relative = value.strip_prefix('/').unwrap_or(value);
        for segment in relative.split('/') {
            if segment == "." || segment == ".." {
                continue;
            }
            self.check_name_value(segment)?;
        }
        Ok(())
    }

    fn child_operations(
        &self,
        node_path: &str,
        effective: &EffectiveNodeType,
        batch_paths: &HashSet<String>,
    ) -> Result<Vec<StoreOperation>, StoreError> {
        let mut operations = Vec::new();
        for definition in &effective.child_node_definitions {
            if definition.is_residual() {
                continue;
            }
            let child_path = path::join(node_path, &definition.name);
            if batch_paths.contains(&child_path) {
                continue;
            }
            if definition.auto_created {
                let child_type = definition.default_primary_type.clone().ok_or_else(|| {
                    StoreError::constraint(format!(
                        "{}: auto-created child '{}' has no default type",
                        node_path, definition.name
                    ))
                })?;
                operations.push(StoreOperation::add(
                    child_path,
                    vec![Property::primary_type(child_type)],
                ));
            } else if definition.mandatory {
                return Err(StoreError::constraint(format!(
                    "{}: mandatory child node '{}' is missing",
                    node_path, definition.name
                )));
            }
        }
        Ok(operations)
    }
}

fn mixin_names(properties: &[Property]) -> Vec<String> {
    properties
        .iter()
        .find(|p| p.name == MIXIN_TYPES)
        .map(|p| p.str_values().map(str::to_string).collect())
        .unwrap_or_default()
}

fn set_property(properties: &mut Vec<Property>, property: Property) {
    match properties.iter_mut().find(|p| p.name == property.name) {
        Some(existing) => *existing = property,
        None => properties.push(property),
    }
}

fn now() -> PropertyValue {
    let timestamp: DateTime<FixedOffset> = Utc::now().fixed_offset();
    PropertyValue::Date(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ErrorKind;
    use crate::models::{NodeTypeDefinition, PropertyDefinition};

    fn fixtures() -> (NodeTypeRegistry, NamespaceRegistry, Credentials) {
        let types = NodeTypeRegistry::with_definitions(vec![NodeTypeDefinition::new("app:post")
            .with_supertypes(&["nt:base"])
            .with_property(PropertyDefinition::new("app:title", PropertyType::String).mandatory())
            .with_property(
                PropertyDefinition::new("app:status", PropertyType::String)
                    .auto_created()
                    .with_default(vec![PropertyValue::from("draft")]),
            )]);
        let namespaces =
            NamespaceRegistry::with_entries(vec![("app".to_string(), "urn:app".to_string())]);
        (types, namespaces, Credentials::new("alice"))
    }

    #[test]
    fn test_auto_created_properties() {
        let (types, namespaces, credentials) = fixtures();
        let processor = NodeProcessor::new(&types, &namespaces, &credentials);

        let processed = processor
            .process_new(
                "/post",
                "id-1",
                vec![
                    Property::primary_type("app:post"),
                    Property::string("app:title", "Hello"),
                ],
                &HashSet::new(),
            )
            .unwrap();

        let status = processed.properties.iter().find(|p| p.name == "app:status").unwrap();
        assert_eq!(status.first_str(), Some("draft"));
        assert!(processed.child_operations.is_empty());
    }

    #[test]
    fn test_referenceable_and_created_stamps() {
        let (types, namespaces, credentials) = fixtures();
        let processor = NodeProcessor::new(&types, &namespaces, &credentials);

        let processed = processor
            .process_new(
                "/docs",
                "id-42",
                vec![
                    Property::primary_type("nt:folder"),
                    Property::mixin_types(&["mix:referenceable"]),
                ],
                &HashSet::new(),
            )
            .unwrap();

        let uuid = processed.properties.iter().find(|p| p.name == UUID).unwrap();
        assert_eq!(uuid.first_str(), Some("id-42"));
        let created_by = processed
            .properties
            .iter()
            .find(|p| p.name == "jcr:createdBy")
            .unwrap();
        assert_eq!(created_by.first_str(), Some("alice"));
        assert!(processed.properties.iter().any(|p| p.name == "jcr:created"));
    }

    #[test]
    fn test_mandatory_rules() {
        let (types, namespaces, credentials) = fixtures();
        let processor = NodeProcessor::new(&types, &namespaces, &credentials);

        let err = processor
            .process_new("/post", "id", vec![Property::primary_type("app:post")], &HashSet::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        // nt:file needs jcr:content, accepted when the batch adds it
        let err = processor
            .process_new("/f", "id", vec![Property::primary_type("nt:file")], &HashSet::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        let batch: HashSet<String> = ["/f/jcr:content".to_string()].into_iter().collect();
        assert!(processor
            .process_new("/f", "id", vec![Property::primary_type("nt:file")], &batch)
            .is_ok());
    }

    #[test]
    fn test_type_rules() {
        let (types, namespaces, credentials) = fixtures();
        let processor = NodeProcessor::new(&types, &namespaces, &credentials);

        for bad in ["nt:base", "mix:created", "app:unknown"] {
            let err = processor
                .process_new("/x", "id", vec![Property::primary_type(bad)], &HashSet::new())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConstraintViolation, "{}", bad);
        }

        let err = processor
            .process_new(
                "/x",
                "id",
                vec![Property::mixin_types(&["nt:folder"])],
                &HashSet::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn test_value_grammar() {
        let (types, namespaces, credentials) = fixtures();
        let processor = NodeProcessor::new(&types, &namespaces, &credentials);
        let new = |property: Property| {
            processor.process_new("/x", "id", vec![property], &HashSet::new())
        };

        let err = new(Property::single("n", PropertyType::Name, PropertyValue::from("a/b"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueFormat);

        let err = new(Property::single("n", PropertyType::Name, PropertyValue::from("zz:b"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Namespace);

        let err = new(Property::single("p", PropertyType::Path, PropertyValue::from("/a//b"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueFormat);

        let err = new(Property::single("u", PropertyType::Uri, PropertyValue::from("not a uri"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueFormat);

        assert!(new(Property::single("u", PropertyType::Uri, PropertyValue::from("urn:isbn:1"))).is_ok());
        assert!(new(Property::single("p", PropertyType::Path, PropertyValue::from("../app:x"))).is_ok());
    }
}
