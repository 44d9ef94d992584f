//! Property Blob Codec
//!
//! Serializes a node's property set into a compact tagged markup blob and reads
//! it back with a single-pass pull parser. No document tree is ever built:
//!
//! - [`encode`] writes one `sv:property` element per property and queues binary
//!   payloads and reference edges for the store to persist separately
//! - [`decode`] / [`decode_filtered`] rebuild typed values, skipping the subtrees
//!   of properties the caller did not ask for
//! - [`remove_properties`] copies the blob byte-for-byte except the removed
//!   property elements, so escaping of untouched text is preserved exactly
//!
//! # Blob Grammar
//!
//! ```text
//! <sv:node xmlns:sv="http://www.jcp.org/jcr/sv/1.0" ...>
//!   <sv:property sv:name="title" sv:type="String" sv:multi-valued="0">
//!     <sv:value>Hello</sv:value>
//!   </sv:property>
//! </sv:node>
//! ```
//!
//! The helpers [`property_marker`] and [`value_xpath`] expose the same grammar to
//! the query compiler so it can extract values inside the database.

mod reader;
mod writer;

pub use reader::{decode, decode_filtered, remove_properties};
pub use writer::encode;

use crate::models::PropertyType;
use quick_xml::events::attributes::AttrError;
use thiserror::Error;

/// URI bound to the `sv` prefix inside every blob
pub const SV_NAMESPACE: &str = "http://www.jcp.org/jcr/sv/1.0";

pub(crate) const NODE_ELEMENT: &str = "sv:node";
pub(crate) const PROPERTY_ELEMENT: &str = "sv:property";
pub(crate) const VALUE_ELEMENT: &str = "sv:value";
pub(crate) const NAME_ATTRIBUTE: &str = "sv:name";
pub(crate) const TYPE_ATTRIBUTE: &str = "sv:type";
pub(crate) const MULTI_VALUED_ATTRIBUTE: &str = "sv:multi-valued";

/// Namespace declarations written on the root element
pub(crate) const ROOT_NAMESPACES: [(&str, &str); 4] = [
    ("xmlns:sv", SV_NAMESPACE),
    ("xmlns:jcr", "http://www.jcp.org/jcr/1.0"),
    ("xmlns:nt", "http://www.jcp.org/jcr/nt/1.0"),
    ("xmlns:mix", "http://www.jcp.org/jcr/mix/1.0"),
];

/// Codec failures
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed property blob: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed attribute in property blob: {0}")]
    Attribute(#[from] AttrError),

    #[error("Failed to write property blob: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown property type tag '{0}'")]
    UnknownType(String),

    #[error("Property element is missing attribute '{0}'")]
    MissingAttribute(&'static str),

    #[error("Invalid {property_type} value '{value}' for property '{property}'")]
    InvalidValue {
        property: String,
        property_type: PropertyType,
        value: String,
    },

    #[error("Value of property '{property}' does not match its type {expected}")]
    TypeMismatch {
        property: String,
        expected: PropertyType,
    },

    #[error("Malformed property blob: {0}")]
    Malformed(String),
}

impl CodecError {
    /// True for failures caused by the caller's values rather than stored data
    pub fn is_value_error(&self) -> bool {
        matches!(self, CodecError::TypeMismatch { .. })
    }
}

/// Binary payload queued by `encode`, one per value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPayload {
    pub property_name: String,
    pub index: usize,
    pub data: Vec<u8>,
}

/// Strength of a reference edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Strong,
    Weak,
}

impl ReferenceKind {
    pub fn from_type(property_type: PropertyType) -> Option<Self> {
        match property_type {
            PropertyType::Reference => Some(ReferenceKind::Strong),
            PropertyType::WeakReference => Some(ReferenceKind::Weak),
            _ => None,
        }
    }

    /// Edge table holding this kind
    pub fn table(&self) -> &'static str {
        match self {
            ReferenceKind::Strong => "nodes_references",
            ReferenceKind::Weak => "nodes_weakreferences",
        }
    }
}

/// Reference value queued by `encode`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceEdge {
    pub property_name: String,
    pub target_identifier: String,
    pub kind: ReferenceKind,
}

/// Output of `encode`
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedProperties {
    pub blob: String,
    pub binaries: Vec<BinaryPayload>,
    pub references: Vec<ReferenceEdge>,
}

/// Output of `remove_properties`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedProperties {
    pub blob: String,
    /// Every removed property name, in blob order
    pub removed: Vec<String>,
    /// Removed properties that were `Reference` typed
    pub references: Vec<String>,
    /// Removed properties that were `WeakReference` typed
    pub weak_references: Vec<String>,
    /// Removed properties that were `Binary` typed
    pub binaries: Vec<String>,
}

impl RemovedProperties {
    pub fn was_removed(&self, name: &str) -> bool {
        self.removed.iter().any(|n| n == name)
    }
}

/// Escape text the way the writer escapes attribute values
pub fn escape_attribute(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}

/// Literal prefix of a property element in the blob, used for substring lookup
///
/// ```rust
/// use arbor_core::codec::property_marker;
///
/// assert_eq!(property_marker("title"), "<sv:property sv:name=\"title\"");
/// ```
pub fn property_marker(name: &str) -> String {
    format!(
        "<{} {}=\"{}\"",
        PROPERTY_ELEMENT,
        NAME_ATTRIBUTE,
        escape_attribute(name)
    )
}

/// XPath selecting the first value of a property
pub fn value_xpath(name: &str) -> String {
    format!(
        "//{}[@{}=\"{}\"]/{}[1]",
        PROPERTY_ELEMENT,
        NAME_ATTRIBUTE,
        escape_attribute(name),
        VALUE_ELEMENT
    )
}

/// XPath selecting a property element
pub fn property_xpath(name: &str) -> String {
    format!(
        "//{}[@{}=\"{}\"]",
        PROPERTY_ELEMENT,
        NAME_ATTRIBUTE,
        escape_attribute(name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_escape_names() {
        assert_eq!(
            property_marker("a&b"),
            "<sv:property sv:name=\"a&amp;b\""
        );
        assert_eq!(
            value_xpath("jcr:title"),
            "//sv:property[@sv:name=\"jcr:title\"]/sv:value[1]"
        );
    }
}
