use super::{
    CodecError, RemovedProperties, MULTI_VALUED_ATTRIBUTE, NAME_ATTRIBUTE, NODE_ELEMENT,
    PROPERTY_ELEMENT, TYPE_ATTRIBUTE, VALUE_ELEMENT,
};
use crate::models::{BinaryValue, Property, PropertyType, PropertyValue, DATE_FORMAT};
use chrono::DateTime;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Attributes of one `sv:property` element
struct PropertyHeader {
    name: String,
    property_type: PropertyType,
    multiple: bool,
}

/// Property being assembled while its element is open
struct PendingProperty {
    header: PropertyHeader,
    values: Vec<PropertyValue>,
    inline_text: String,
    value_text: Option<String>,
}

impl PendingProperty {
    fn new(header: PropertyHeader) -> Self {
        Self {
            header,
            values: Vec::new(),
            inline_text: String::new(),
            value_text: None,
        }
    }

    fn open_value(&mut self) {
        self.value_text = Some(String::new());
    }

    fn push_text(&mut self, text: &str) {
        match self.value_text.as_mut() {
            Some(value) => value.push_str(text),
            None => self.inline_text.push_str(text),
        }
    }

    fn close_value(&mut self) -> Result<(), CodecError> {
        let text = self.value_text.take().unwrap_or_default();
        let value = coerce(&self.header, &text)?;
        self.values.push(value);
        Ok(())
    }

    fn finish(mut self) -> Result<Property, CodecError> {
        // compact form: `<sv:property ...>text</sv:property>`
        let inline = self.inline_text.trim();
        if self.values.is_empty() && !inline.is_empty() {
            let value = coerce(&self.header, inline)?;
            self.values.push(value);
        }
        Ok(Property {
            name: self.header.name,
            property_type: self.header.property_type,
            multiple: self.header.multiple,
            values: self.values,
        })
    }
}

fn is_element(e: &BytesStart<'_>, name: &str) -> bool {
    e.name().as_ref() == name.as_bytes()
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn read_header(e: &BytesStart<'_>) -> Result<PropertyHeader, CodecError> {
    let mut name = None;
    let mut property_type = None;
    let mut multiple = false;

    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        let value = attr.unescape_value()?;
        if key == NAME_ATTRIBUTE.as_bytes() {
            name = Some(value.into_owned());
        } else if key == TYPE_ATTRIBUTE.as_bytes() {
            let parsed = PropertyType::from_tag(&value)
                .ok_or_else(|| CodecError::UnknownType(value.to_string()))?;
            property_type = Some(parsed);
        } else if key == MULTI_VALUED_ATTRIBUTE.as_bytes() {
            multiple = parse_flag(&value);
        }
    }

    Ok(PropertyHeader {
        name: name.ok_or(CodecError::MissingAttribute(NAME_ATTRIBUTE))?,
        property_type: property_type.ok_or(CodecError::MissingAttribute(TYPE_ATTRIBUTE))?,
        multiple,
    })
}

fn coerce(header: &PropertyHeader, text: &str) -> Result<PropertyValue, CodecError> {
    let invalid = || CodecError::InvalidValue {
        property: header.name.clone(),
        property_type: header.property_type,
        value: text.to_string(),
    };
    let trimmed = text.trim();

    let value = match header.property_type {
        PropertyType::Boolean => match trimmed {
            "1" => PropertyValue::Boolean(true),
            "0" => PropertyValue::Boolean(false),
            t if t.eq_ignore_ascii_case("true") => PropertyValue::Boolean(true),
            t if t.eq_ignore_ascii_case("false") => PropertyValue::Boolean(false),
            _ => return Err(invalid()),
        },
        PropertyType::Long => PropertyValue::Long(trimmed.parse().map_err(|_| invalid())?),
        PropertyType::Double => PropertyValue::Double(trimmed.parse().map_err(|_| invalid())?),
        PropertyType::Decimal => {
            trimmed.parse::<f64>().map_err(|_| invalid())?;
            PropertyValue::Decimal(trimmed.to_string())
        }
        PropertyType::Date => {
            let date = DateTime::parse_from_str(trimmed, DATE_FORMAT)
                .or_else(|_| DateTime::parse_from_rfc3339(trimmed))
                .map_err(|_| invalid())?;
            PropertyValue::Date(date)
        }
        PropertyType::Binary => PropertyValue::Binary(BinaryValue::Length(
            trimmed.parse().map_err(|_| invalid())?,
        )),
        PropertyType::String
        | PropertyType::Name
        | PropertyType::Path
        | PropertyType::Uri
        | PropertyType::Reference
        | PropertyType::WeakReference => PropertyValue::String(text.to_string()),
    };
    Ok(value)
}

/// Decode every property of a blob
pub fn decode(blob: &str) -> Result<Vec<Property>, CodecError> {
    decode_filtered(blob, |_| true)
}

/// Decode the properties whose name passes `filter`
///
/// Rejected property elements are skipped without decoding their values.
///
/// # Errors
///
/// Any malformed markup, an unknown type tag, or a value that fails its type's
/// coercion rule.
pub fn decode_filtered<F>(blob: &str, filter: F) -> Result<Vec<Property>, CodecError>
where
    F: Fn(&str) -> bool,
{
    let mut reader = Reader::from_str(blob);
    let mut properties = Vec::new();
    let mut current: Option<PendingProperty> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if is_element(&e, PROPERTY_ELEMENT) {
                    let header = read_header(&e)?;
                    if filter(&header.name) {
                        current = Some(PendingProperty::new(header));
                    } else {
                        reader.read_to_end(e.name())?;
                    }
                } else if is_element(&e, VALUE_ELEMENT) {
                    match current.as_mut() {
                        Some(pending) => pending.open_value(),
                        None => {
                            return Err(CodecError::Malformed(
                                "value element outside of a property".to_string(),
                            ))
                        }
                    }
                } else if !is_element(&e, NODE_ELEMENT) {
                    reader.read_to_end(e.name())?;
                }
            }
            Event::Empty(e) => {
                if is_element(&e, PROPERTY_ELEMENT) {
                    let header = read_header(&e)?;
                    if filter(&header.name) {
                        properties.push(PendingProperty::new(header).finish()?);
                    }
                } else if is_element(&e, VALUE_ELEMENT) {
                    if let Some(pending) = current.as_mut() {
                        pending.open_value();
                        pending.close_value()?;
                    }
                }
            }
            Event::Text(t) => {
                if let Some(pending) = current.as_mut() {
                    pending.push_text(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(pending) = current.as_mut() {
                    let text = std::str::from_utf8(&c)
                        .map_err(|e| CodecError::Malformed(format!("invalid UTF-8: {}", e)))?;
                    pending.push_text(text);
                }
            }
            Event::End(e) => {
                let name = e.name();
                if name.as_ref() == VALUE_ELEMENT.as_bytes() {
                    if let Some(pending) = current.as_mut() {
                        pending.close_value()?;
                    }
                } else if name.as_ref() == PROPERTY_ELEMENT.as_bytes() {
                    if let Some(pending) = current.take() {
                        properties.push(pending.finish()?);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(properties)
}

/// Remove the named properties from a blob in a single streaming pass
///
/// Markup outside the removed elements is copied byte-for-byte. Names that do
/// not occur in the blob are ignored; check `RemovedProperties::removed` to
/// see what was actually dropped.
pub fn remove_properties<S>(blob: &str, names: &[S]) -> Result<RemovedProperties, CodecError>
where
    S: AsRef<str>,
{
    let mut reader = Reader::from_str(blob);
    let mut result = RemovedProperties::default();
    let mut rewritten = String::with_capacity(blob.len());
    let mut copied_to = 0usize;

    let slice = |from: usize, to: usize| {
        blob.get(from..to)
            .ok_or_else(|| CodecError::Malformed(format!("bad offsets {}..{}", from, to)))
    };

    loop {
        let event_start = reader.buffer_position();
        let header = match reader.read_event()? {
            Event::Start(e) if is_element(&e, PROPERTY_ELEMENT) => {
                let header = read_header(&e)?;
                reader.read_to_end(e.name())?;
                header
            }
            Event::Empty(e) if is_element(&e, PROPERTY_ELEMENT) => read_header(&e)?,
            Event::Eof => break,
            _ => continue,
        };

        if names.iter().any(|n| n.as_ref() == header.name) {
            rewritten.push_str(slice(copied_to, event_start)?);
            copied_to = reader.buffer_position();

            match header.property_type {
                PropertyType::Reference => result.references.push(header.name.clone()),
                PropertyType::WeakReference => result.weak_references.push(header.name.clone()),
                PropertyType::Binary => result.binaries.push(header.name.clone()),
                _ => {}
            }
            result.removed.push(header.name);
        }
    }

    rewritten.push_str(slice(copied_to, blob.len())?);
    result.blob = rewritten;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use chrono::DateTime;

    fn sample_properties() -> Vec<Property> {
        let date = DateTime::parse_from_rfc3339("2024-05-01T10:20:30.123+02:00").unwrap();
        vec![
            Property::string("s", "plain & <escaped>"),
            Property::multi(
                "sm",
                PropertyType::String,
                vec![PropertyValue::from("a"), PropertyValue::from("b")],
            ),
            Property::long("l", -17),
            Property::multi(
                "lm",
                PropertyType::Long,
                vec![PropertyValue::Long(1), PropertyValue::Long(2)],
            ),
            Property::single("d", PropertyType::Double, 2.5f64),
            Property::single(
                "dec",
                PropertyType::Decimal,
                PropertyValue::Decimal("123.450".to_string()),
            ),
            Property::boolean("b", true),
            Property::multi(
                "bm",
                PropertyType::Boolean,
                vec![PropertyValue::Boolean(false), PropertyValue::Boolean(true)],
            ),
            Property::single("date", PropertyType::Date, date),
            Property::single("n", PropertyType::Name, PropertyValue::from("jcr:content")),
            Property::single("p", PropertyType::Path, PropertyValue::from("/a/b")),
            Property::single("u", PropertyType::Uri, PropertyValue::from("http://x.org/?a=1&b=2")),
            Property::reference("r", "0f6c0a3e-0000-4000-8000-000000000001"),
            Property::multi(
                "wm",
                PropertyType::WeakReference,
                vec![PropertyValue::from("w1"), PropertyValue::from("w2")],
            ),
            Property::single(
                "bin",
                PropertyType::Binary,
                PropertyValue::Binary(BinaryValue::Length(42)),
            ),
            Property::multi("empty", PropertyType::String, vec![]),
        ]
    }

    #[test]
    fn test_round_trip_every_type() {
        let properties = sample_properties();
        let encoded = encode(&properties).unwrap();
        let decoded = decode(&encoded.blob).unwrap();
        assert_eq!(decoded, properties);
    }

    #[test]
    fn test_binary_payload_decodes_as_length() {
        let encoded = encode(&[Property::binary("data", vec![0u8; 10])]).unwrap();
        let decoded = decode(&encoded.blob).unwrap();
        assert_eq!(
            decoded[0].values,
            vec![PropertyValue::Binary(BinaryValue::Length(10))]
        );
    }

    #[test]
    fn test_name_filter_skips_other_properties() {
        let encoded = encode(&sample_properties()).unwrap();
        let decoded = decode_filtered(&encoded.blob, |name| name == "l" || name == "u").unwrap();
        let names: Vec<&str> = decoded.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["l", "u"]);
    }

    #[test]
    fn test_compact_single_value_form() {
        let blob = "<sv:node xmlns:sv=\"http://www.jcp.org/jcr/sv/1.0\">\
            <sv:property sv:name=\"count\" sv:type=\"Long\" sv:multi-valued=\"0\">7</sv:property>\
            </sv:node>";
        let decoded = decode(blob).unwrap();
        assert_eq!(decoded, vec![Property::long("count", 7)]);
    }

    #[test]
    fn test_type_tags_are_case_insensitive() {
        let blob = "<sv:node xmlns:sv=\"http://www.jcp.org/jcr/sv/1.0\">\
            <sv:property sv:name=\"flag\" sv:type=\"BOOLEAN\" sv:multi-valued=\"0\"><sv:value>true</sv:value></sv:property>\
            </sv:node>";
        let decoded = decode(blob).unwrap();
        assert_eq!(decoded, vec![Property::boolean("flag", true)]);
    }

    #[test]
    fn test_unknown_type_tag_is_fatal() {
        let blob = "<sv:node xmlns:sv=\"http://www.jcp.org/jcr/sv/1.0\">\
            <sv:property sv:name=\"x\" sv:type=\"Blob\" sv:multi-valued=\"0\"><sv:value>1</sv:value></sv:property>\
            </sv:node>";
        assert!(matches!(decode(blob), Err(CodecError::UnknownType(tag)) if tag == "Blob"));
    }

    #[test]
    fn test_remove_properties_keeps_other_markup_verbatim() {
        let properties = vec![
            Property::string("keep", "x < y & z"),
            Property::reference("ref", "target-1"),
            Property::binary("bin", vec![1, 2]),
            Property::weak_reference("weak", "target-2"),
        ];
        let encoded = encode(&properties).unwrap();
        let removed = remove_properties(&encoded.blob, &["ref", "bin", "weak", "absent"]).unwrap();

        assert_eq!(removed.references, vec!["ref".to_string()]);
        assert_eq!(removed.weak_references, vec!["weak".to_string()]);
        assert_eq!(removed.binaries, vec!["bin".to_string()]);
        assert!(removed.was_removed("ref"));
        assert!(!removed.was_removed("absent"));
        assert!(removed.blob.contains("<sv:value>x &lt; y &amp; z</sv:value>"));

        let remaining = decode(&removed.blob).unwrap();
        assert_eq!(remaining, vec![Property::string("keep", "x < y & z")]);
    }
}
