//! Query Compiler
//!
//! Turns a [`QueryObjectModel`] into one SQL `SELECT` over the `nodes` table.
//! The workspace name is the only bind parameter (`?`); every literal is
//! inlined as a quoted string.
//!
//! # Examples
//!
//! ```rust
//! use arbor_core::query::{Dialect, QueryCompiler, QueryObjectModel, StaticNodeTypes};
//! use std::collections::HashMap;
//!
//! let namespaces = HashMap::new();
//! let types = StaticNodeTypes::default();
//! let compiler = QueryCompiler::new(Dialect::Sqlite, &namespaces, &types);
//!
//! let compiled = compiler.compile(&QueryObjectModel::select("nt:unstructured")).unwrap();
//! assert_eq!(
//!     compiled.sql,
//!     "SELECT path, identifier, type, props FROM nodes \
//!      WHERE workspace_name = ? AND type IN ('nt:unstructured')"
//! );
//! ```

use super::ast::{
    Constraint, DynamicOperand, Literal, Order, QueryObjectModel, Source, StaticOperand,
};
use super::dialect::{quote, Dialect};
use crate::models::{path, PropertyType, UUID};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Columns selected for every row
pub const SELECT_COLUMNS: &str = "path, identifier, type, props";

/// Pseudo-property naming the node path
pub const PATH_PROPERTY: &str = "jcr:path";

/// Query compilation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unsupported query element: {0}")]
    Unsupported(String),

    #[error("Malformed query value: {0}")]
    ValueFormat(String),

    #[error("Unknown namespace prefix '{0}'")]
    UnknownPrefix(String),
}

/// Subtype lookup used to expand a selector to its whole type hierarchy
pub trait NodeTypeLookup: Send + Sync {
    /// All transitive subtypes of `node_type`, excluding itself
    fn subtypes(&self, node_type: &str) -> Vec<String>;
}

/// Fixed subtype table, handy for tests and offline compilation
#[derive(Debug, Clone, Default)]
pub struct StaticNodeTypes {
    subtypes: HashMap<String, Vec<String>>,
}

impl StaticNodeTypes {
    pub fn with_subtypes(mut self, node_type: &str, subtypes: &[&str]) -> Self {
        self.subtypes.insert(
            node_type.to_string(),
            subtypes.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

impl NodeTypeLookup for StaticNodeTypes {
    fn subtypes(&self, node_type: &str) -> Vec<String> {
        self.subtypes.get(node_type).cloned().unwrap_or_default()
    }
}

/// Compiled statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub sql: String,
    /// Rows to skip after fetching, set when an offset has no limit to ride on
    pub skip: u64,
}

pub struct QueryCompiler<'a> {
    dialect: Dialect,
    namespaces: &'a HashMap<String, String>,
    node_types: &'a dyn NodeTypeLookup,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(
        dialect: Dialect,
        namespaces: &'a HashMap<String, String>,
        node_types: &'a dyn NodeTypeLookup,
    ) -> Self {
        Self {
            dialect,
            namespaces,
            node_types,
        }
    }

    pub fn compile(&self, qom: &QueryObjectModel) -> Result<CompiledQuery, QueryError> {
        let node_type = match &qom.source {
            Source::Selector { node_type, .. } => node_type,
            Source::Join { .. } => return Err(QueryError::Unsupported("Join".to_string())),
        };

        let mut sql = format!(
            "SELECT {} FROM nodes WHERE workspace_name = ? AND type IN ({})",
            SELECT_COLUMNS,
            self.type_list(node_type)
        );

        if let Some(constraint) = &qom.constraint {
            sql.push_str(" AND ");
            sql.push_str(&self.constraint(constraint)?);
        }

        if !qom.orderings.is_empty() {
            let keys = qom
                .orderings
                .iter()
                .map(|ordering| {
                    let direction = match ordering.order {
                        Order::Ascending => "ASC",
                        Order::Descending => "DESC",
                    };
                    Ok(format!("{} {}", self.operand(&ordering.operand)?, direction))
                })
                .collect::<Result<Vec<_>, QueryError>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        let mut skip = 0;
        match (qom.limit, qom.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => skip = offset,
            (None, None) => {}
        }

        Ok(CompiledQuery { sql, skip })
    }

    fn type_list(&self, node_type: &str) -> String {
        let subtypes: BTreeSet<String> = self
            .node_types
            .subtypes(node_type)
            .into_iter()
            .filter(|s| s != node_type)
            .collect();

        std::iter::once(node_type.to_string())
            .chain(subtypes)
            .map(|t| quote(&t))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn constraint(&self, constraint: &Constraint) -> Result<String, QueryError> {
        let sql = match constraint {
            Constraint::And(left, right) => {
                format!("({} AND {})", self.constraint(left)?, self.constraint(right)?)
            }
            Constraint::Or(left, right) => {
                format!("({} OR {})", self.constraint(left)?, self.constraint(right)?)
            }
            Constraint::Not(inner) => format!("NOT ({})", self.constraint(inner)?),
            Constraint::Comparison {
                left,
                operator,
                right,
            } => format!(
                "{} {} {}",
                self.operand(left)?,
                operator.as_sql(),
                self.static_operand(right)?
            ),
            Constraint::PropertyExistence { property, .. } => match property.as_str() {
                PATH_PROPERTY | UUID => "1 = 1".to_string(),
                _ => self.dialect.property_exists(property),
            },
            Constraint::FullTextSearch {
                property,
                expression,
                ..
            } => {
                let pattern = quote(&format!("%{}%", expression));
                match property {
                    Some(name) => format!("{} LIKE {}", self.dialect.extract_value(name), pattern),
                    None => format!("props LIKE {}", pattern),
                }
            }
            Constraint::SameNode { path, .. } => format!("path = {}", quote(path)),
            Constraint::ChildNode { path, .. } => format!("parent = {}", quote(path)),
            Constraint::DescendantNode { path, .. } => {
                if path.len() > 1 && path.ends_with('/') {
                    return Err(QueryError::ValueFormat(format!(
                        "descendant path '{}' has a trailing slash",
                        path
                    )));
                }
                if path::is_root(path) {
                    "path LIKE '/_%'".to_string()
                } else {
                    format!(
                        "path LIKE {}{}",
                        quote(&path::descendant_like_pattern(path)),
                        self.dialect.like_escape()
                    )
                }
            }
        };
        Ok(sql)
    }

    fn operand(&self, operand: &DynamicOperand) -> Result<String, QueryError> {
        let sql = match operand {
            DynamicOperand::PropertyValue { property, .. } => self.property_column(property),
            DynamicOperand::Length { property, .. } => {
                format!("length({})", self.property_column(property))
            }
            DynamicOperand::NodeName { .. } => format!(
                "(CASE namespace WHEN '' THEN local_name ELSE {} END)",
                self.dialect.concat(&["namespace", "':'", "local_name"])
            ),
            DynamicOperand::NodeLocalName { .. } => "local_name".to_string(),
            DynamicOperand::LowerCase(inner) => self.dialect.lower(&self.operand(inner)?),
            DynamicOperand::UpperCase(inner) => self.dialect.upper(&self.operand(inner)?),
            DynamicOperand::FullTextSearchScore { .. } => {
                return Err(QueryError::Unsupported(operand.kind().to_string()))
            }
        };
        Ok(sql)
    }

    fn property_column(&self, property: &str) -> String {
        match property {
            PATH_PROPERTY => "path".to_string(),
            UUID => "identifier".to_string(),
            _ => self.dialect.extract_value(property),
        }
    }

    fn static_operand(&self, operand: &StaticOperand) -> Result<String, QueryError> {
        match operand {
            StaticOperand::Literal(literal) => self.literal(literal),
            StaticOperand::BindVariable(_) => Err(QueryError::Unsupported(operand.kind().to_string())),
        }
    }

    fn literal(&self, literal: &Literal) -> Result<String, QueryError> {
        match literal.property_type {
            PropertyType::Name => self.check_prefix(&literal.value)?,
            PropertyType::Path => {
                for segment in literal.value.split('/').filter(|s| !s.is_empty()) {
                    self.check_prefix(segment)?;
                }
            }
            _ => {}
        }
        Ok(quote(&literal.value))
    }

    fn check_prefix(&self, name: &str) -> Result<(), QueryError> {
        let (prefix, _) = path::split_name(name);
        if prefix.is_empty() || self.namespaces.contains_key(prefix) {
            Ok(())
        } else {
            Err(QueryError::UnknownPrefix(prefix.to_string()))
        }
    }
}
