//! Property Data Structures
//!
//! A property is a named, typed, possibly multi-valued value attached to a node.
//! The type tag is authoritative: the value variants only carry the storage
//! representation, so Name, Path, URI, Reference and WeakReference values are all
//! `PropertyValue::String` distinguished by their `PropertyType`.
//!
//! # Examples
//!
//! ```rust
//! use arbor_core::models::{Property, PropertyType, PropertyValue};
//!
//! let title = Property::string("jcr:title", "Hello");
//! assert_eq!(title.property_type, PropertyType::String);
//!
//! let tags = Property::multi(
//!     "tags",
//!     PropertyType::String,
//!     vec![PropertyValue::from("a"), PropertyValue::from("b")],
//! );
//! assert!(tags.multiple);
//! ```

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed timestamp format used for Date values in storage
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Name of the property carrying a node's primary type
pub const PRIMARY_TYPE: &str = "jcr:primaryType";

/// Name of the property carrying a node's mixin types
pub const MIXIN_TYPES: &str = "jcr:mixinTypes";

/// Name of the property mirroring a referenceable node's identifier
pub const UUID: &str = "jcr:uuid";

/// Fixed enumeration of property type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    String,
    Binary,
    Long,
    Double,
    Decimal,
    Boolean,
    Date,
    Name,
    Path,
    Uri,
    Reference,
    WeakReference,
}

impl PropertyType {
    pub const ALL: [PropertyType; 12] = [
        PropertyType::String,
        PropertyType::Binary,
        PropertyType::Long,
        PropertyType::Double,
        PropertyType::Decimal,
        PropertyType::Boolean,
        PropertyType::Date,
        PropertyType::Name,
        PropertyType::Path,
        PropertyType::Uri,
        PropertyType::Reference,
        PropertyType::WeakReference,
    ];

    /// Canonical tag written to the blob
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "String",
            PropertyType::Binary => "Binary",
            PropertyType::Long => "Long",
            PropertyType::Double => "Double",
            PropertyType::Decimal => "Decimal",
            PropertyType::Boolean => "Boolean",
            PropertyType::Date => "Date",
            PropertyType::Name => "Name",
            PropertyType::Path => "Path",
            PropertyType::Uri => "URI",
            PropertyType::Reference => "Reference",
            PropertyType::WeakReference => "WeakReference",
        }
    }

    /// Parse a type tag (case-insensitive)
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(tag))
    }

    /// Strong or weak reference
    pub fn is_reference(&self) -> bool {
        matches!(self, PropertyType::Reference | PropertyType::WeakReference)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binary value: payload on the way in, length once stored
///
/// Stored blobs only carry the byte length; the payload is fetched separately
/// through the binary chunk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BinaryValue {
    Data(Vec<u8>),
    Length(u64),
}

impl BinaryValue {
    pub fn len(&self) -> u64 {
        match self {
            BinaryValue::Data(bytes) => bytes.len() as u64,
            BinaryValue::Length(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage representation of a single value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Double(f64),
    Decimal(String),
    Boolean(bool),
    Date(DateTime<FixedOffset>),
    Binary(BinaryValue),
}

impl PropertyValue {
    /// Text form written inside a value element
    pub fn to_storage_string(&self) -> String {
        match self {
            PropertyValue::String(s) | PropertyValue::Decimal(s) => s.clone(),
            PropertyValue::Long(v) => v.to_string(),
            PropertyValue::Double(v) => v.to_string(),
            PropertyValue::Boolean(v) => if *v { "1" } else { "0" }.to_string(),
            PropertyValue::Date(d) => d.format(DATE_FORMAT).to_string(),
            PropertyValue::Binary(b) => b.len().to_string(),
        }
    }

    /// Whether this variant is a legal representation for `property_type`
    pub fn matches(&self, property_type: PropertyType) -> bool {
        match (self, property_type) {
            (PropertyValue::Long(_), PropertyType::Long)
            | (PropertyValue::Double(_), PropertyType::Double)
            | (PropertyValue::Decimal(_), PropertyType::Decimal)
            | (PropertyValue::Boolean(_), PropertyType::Boolean)
            | (PropertyValue::Date(_), PropertyType::Date)
            | (PropertyValue::Binary(_), PropertyType::Binary) => true,
            (
                PropertyValue::String(_),
                PropertyType::String
                | PropertyType::Name
                | PropertyType::Path
                | PropertyType::Uri
                | PropertyType::Reference
                | PropertyType::WeakReference,
            ) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::Decimal(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Long(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<DateTime<FixedOffset>> for PropertyValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        PropertyValue::Date(value)
    }
}

/// A named, typed property with an ordered value list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub property_type: PropertyType,
    pub multiple: bool,
    pub values: Vec<PropertyValue>,
}

impl Property {
    pub fn single(
        name: impl Into<String>,
        property_type: PropertyType,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self {
            name: name.into(),
            property_type,
            multiple: false,
            values: vec![value.into()],
        }
    }

    pub fn multi(
        name: impl Into<String>,
        property_type: PropertyType,
        values: Vec<PropertyValue>,
    ) -> Self {
        Self {
            name: name.into(),
            property_type,
            multiple: true,
            values,
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::single(name, PropertyType::String, PropertyValue::String(value.into()))
    }

    pub fn long(name: impl Into<String>, value: i64) -> Self {
        Self::single(name, PropertyType::Long, value)
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self::single(name, PropertyType::Boolean, value)
    }

    /// `jcr:primaryType` property
    pub fn primary_type(type_name: impl Into<String>) -> Self {
        Self::single(PRIMARY_TYPE, PropertyType::Name, PropertyValue::String(type_name.into()))
    }

    /// `jcr:mixinTypes` property
    pub fn mixin_types(mixins: &[&str]) -> Self {
        Self::multi(
            MIXIN_TYPES,
            PropertyType::Name,
            mixins.iter().map(|m| PropertyValue::from(*m)).collect(),
        )
    }

    pub fn reference(name: impl Into<String>, target_identifier: impl Into<String>) -> Self {
        Self::single(
            name,
            PropertyType::Reference,
            PropertyValue::String(target_identifier.into()),
        )
    }

    pub fn weak_reference(name: impl Into<String>, target_identifier: impl Into<String>) -> Self {
        Self::single(
            name,
            PropertyType::WeakReference,
            PropertyValue::String(target_identifier.into()),
        )
    }

    pub fn binary(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::single(
            name,
            PropertyType::Binary,
            PropertyValue::Binary(BinaryValue::Data(data)),
        )
    }

    /// First value as text, when it is a string-like value
    pub fn first_str(&self) -> Option<&str> {
        self.values.first().and_then(PropertyValue::as_str)
    }

    /// All string-like values
    pub fn str_values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(PropertyValue::as_str)
    }
}

/// Find a property by name
pub fn find_property<'a>(properties: &'a [Property], name: &str) -> Option<&'a Property> {
    properties.iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_parsing_is_case_insensitive() {
        assert_eq!(PropertyType::from_tag("weakreference"), Some(PropertyType::WeakReference));
        assert_eq!(PropertyType::from_tag("uri"), Some(PropertyType::Uri));
        assert_eq!(PropertyType::from_tag("STRING"), Some(PropertyType::String));
        assert_eq!(PropertyType::from_tag("Blob"), None);
    }

    #[test]
    fn test_storage_strings() {
        assert_eq!(PropertyValue::Boolean(true).to_storage_string(), "1");
        assert_eq!(PropertyValue::Boolean(false).to_storage_string(), "0");
        assert_eq!(PropertyValue::Long(-42).to_storage_string(), "-42");
        assert_eq!(
            PropertyValue::Binary(BinaryValue::Data(vec![1, 2, 3])).to_storage_string(),
            "3"
        );

        let date = DateTime::parse_from_rfc3339("2011-03-21T14:34:20.431+01:00").unwrap();
        assert_eq!(
            PropertyValue::Date(date).to_storage_string(),
            "2011-03-21T14:34:20.431+01:00"
        );
    }

    #[test]
    fn test_value_type_matching() {
        assert!(PropertyValue::from("x").matches(PropertyType::Reference));
        assert!(PropertyValue::from(1i64).matches(PropertyType::Long));
        assert!(!PropertyValue::from(1i64).matches(PropertyType::String));
        assert!(!PropertyValue::from("x").matches(PropertyType::Binary));
    }
}
