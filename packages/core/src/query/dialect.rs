//! SQL Dialects
//!
//! The only dialect-specific surface of the compiler: case functions, string
//! concatenation, and the two blob extraction primitives (value extraction and
//! property existence). Everything else the compiler emits is plain SQL.

use crate::codec::{property_marker, property_xpath, value_xpath, SV_NAMESPACE};
use serde::{Deserialize, Serialize};

/// Column holding the serialized property blob
pub const PROPS_COLUMN: &str = "props";

const VALUE_OPEN: &str = "<sv:value>";
const VALUE_CLOSE: &str = "</sv:value>";
const PROPERTY_CLOSE: &str = "</sv:property>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    MySql,
}

/// Quote a string literal, doubling embedded quotes
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl Dialect {
    pub fn lower(&self, expr: &str) -> String {
        match self {
            Dialect::Sqlite => format!("lower({})", expr),
            Dialect::Postgres => format!("LOWER({})", expr),
            Dialect::MySql => format!("LCASE({})", expr),
        }
    }

    pub fn upper(&self, expr: &str) -> String {
        match self {
            Dialect::Sqlite => format!("upper({})", expr),
            Dialect::Postgres => format!("UPPER({})", expr),
            Dialect::MySql => format!("UCASE({})", expr),
        }
    }

    pub fn concat(&self, parts: &[&str]) -> String {
        match self {
            Dialect::Sqlite | Dialect::Postgres => parts.join(" || "),
            Dialect::MySql => format!("CONCAT({})", parts.join(", ")),
        }
    }

    /// Expression yielding the first value of `property` as text, NULL if absent
    pub fn extract_value(&self, property: &str) -> String {
        match self {
            Dialect::Sqlite => {
                let start = format!("instr({}, {})", PROPS_COLUMN, quote(&property_marker(property)));
                let tail = format!("substr({}, {})", PROPS_COLUMN, start);
                let open = format!("instr({}, {})", tail, quote(VALUE_OPEN));
                let close = format!("instr({}, {})", tail, quote(VALUE_CLOSE));
                let end = format!("instr({}, {})", tail, quote(PROPERTY_CLOSE));
                let tag_end = format!("instr({}, '>')", tail);
                let raw = format!(
                    "substr({tail}, {open} + {len}, {close} - {open} - {len})",
                    tail = tail,
                    open = open,
                    close = close,
                    len = VALUE_OPEN.len()
                );
                // inline form: text directly inside the property element
                let inline = format!(
                    "substr({tail}, {tag_end} + 1, {end} - {tag_end} - 1)",
                    tail = tail,
                    tag_end = tag_end,
                    end = end
                );
                format!(
                    "(CASE WHEN {start} > 0 AND {open} > 0 AND {open} < {end} THEN {value} \
                     WHEN {start} > 0 AND {end} > 0 AND instr({inline}, '<') = 0 THEN {inline_value} END)",
                    start = start,
                    open = open,
                    end = end,
                    value = Self::unescape(&raw),
                    inline = inline,
                    inline_value = Self::unescape(&format!("NULLIF({}, '')", inline))
                )
            }
            Dialect::Postgres => format!(
                "(xpath({}, CAST({} AS xml), {}))[1]::text",
                quote(&format!("{}/text()", value_xpath(property))),
                PROPS_COLUMN,
                Self::postgres_namespaces()
            ),
            Dialect::MySql => format!(
                "EXTRACTVALUE({}, {})",
                PROPS_COLUMN,
                quote(&value_xpath(property))
            ),
        }
    }

    /// Predicate true when the blob carries `property`
    pub fn property_exists(&self, property: &str) -> String {
        match self {
            Dialect::Sqlite => format!(
                "instr({}, {}) > 0",
                PROPS_COLUMN,
                quote(&property_marker(property))
            ),
            Dialect::Postgres => format!(
                "xpath_exists({}, CAST({} AS xml), {})",
                quote(&property_xpath(property)),
                PROPS_COLUMN,
                Self::postgres_namespaces()
            ),
            Dialect::MySql => format!(
                "EXTRACTVALUE({}, {}) > 0",
                PROPS_COLUMN,
                quote(&format!("count({})", property_xpath(property)))
            ),
        }
    }

    /// Clause making `\` the LIKE escape character, empty where it already is
    pub fn like_escape(&self) -> &'static str {
        match self {
            Dialect::Sqlite => " ESCAPE '\\'",
            Dialect::Postgres | Dialect::MySql => "",
        }
    }

    fn unescape(expr: &str) -> String {
        format!(
            "replace(replace(replace({}, '&lt;', '<'), '&gt;', '>'), '&amp;', '&')",
            expr
        )
    }

    fn postgres_namespaces() -> String {
        format!("ARRAY[ARRAY['sv', {}]]", quote(SV_NAMESPACE))
    }
}
