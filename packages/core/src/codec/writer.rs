use super::{
    BinaryPayload, CodecError, EncodedProperties, ReferenceEdge, ReferenceKind,
    MULTI_VALUED_ATTRIBUTE, NAME_ATTRIBUTE, NODE_ELEMENT, PROPERTY_ELEMENT, ROOT_NAMESPACES,
    TYPE_ATTRIBUTE, VALUE_ELEMENT,
};
use crate::models::{BinaryValue, Property, PropertyValue};
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

/// Serialize a property set into a blob
///
/// Binary values are written as their byte length; payloads carried as
/// `BinaryValue::Data` are queued in `binaries`. A `BinaryValue::Length` has
/// no payload to queue, its stored chunks are left as they are.
///
/// Reference and weak-reference values are written as identifier text and
/// queued in `references`.
///
/// # Errors
///
/// `CodecError::TypeMismatch` when a value variant does not fit the property's
/// type tag.
pub fn encode(properties: &[Property]) -> Result<EncodedProperties, CodecError> {
    let mut writer = Writer::new(Vec::new());
    let mut binaries = Vec::new();
    let mut references = Vec::new();

    let mut root = BytesStart::new(NODE_ELEMENT);
    for declaration in ROOT_NAMESPACES {
        root.push_attribute(declaration);
    }
    writer.write_event(Event::Start(root))?;

    for property in properties {
        let reference_kind = ReferenceKind::from_type(property.property_type);

        let mut element = BytesStart::new(PROPERTY_ELEMENT);
        element.push_attribute((NAME_ATTRIBUTE, property.name.as_str()));
        element.push_attribute((TYPE_ATTRIBUTE, property.property_type.as_str()));
        element.push_attribute((
            MULTI_VALUED_ATTRIBUTE,
            if property.multiple { "1" } else { "0" },
        ));
        writer.write_event(Event::Start(element))?;

        for (index, value) in property.values.iter().enumerate() {
            if !value.matches(property.property_type) {
                return Err(CodecError::TypeMismatch {
                    property: property.name.clone(),
                    expected: property.property_type,
                });
            }

            if let PropertyValue::Binary(BinaryValue::Data(data)) = value {
                binaries.push(BinaryPayload {
                    property_name: property.name.clone(),
                    index,
                    data: data.clone(),
                });
            }

            let text = value.to_storage_string();
            if let Some(kind) = reference_kind {
                references.push(ReferenceEdge {
                    property_name: property.name.clone(),
                    target_identifier: text.clone(),
                    kind,
                });
            }

            writer.write_event(Event::Start(BytesStart::new(VALUE_ELEMENT)))?;
            writer.write_event(Event::Text(BytesText::from_escaped(partial_escape(&text))))?;
            writer.write_event(Event::End(BytesEnd::new(VALUE_ELEMENT)))?;
        }

        writer.write_event(Event::End(BytesEnd::new(PROPERTY_ELEMENT)))?;
    }

    writer.write_event(Event::End(BytesEnd::new(NODE_ELEMENT)))?;

    let blob = String::from_utf8(writer.into_inner())
        .map_err(|e| CodecError::Malformed(format!("writer produced invalid UTF-8: {}", e)))?;

    Ok(EncodedProperties {
        blob,
        binaries,
        references,
    })
}
