//! Query Object Model
//!
//! Closed sum types for the query algebra. Text query languages are parsed
//! upstream into this tree; the compiler consumes it with exhaustive matches.
//!
//! # Examples
//!
//! ```rust
//! use arbor_core::query::{Constraint, QueryObjectModel};
//!
//! let qom = QueryObjectModel::select("nt:unstructured")
//!     .with_constraint(Constraint::or(
//!         Constraint::same_node("/a"),
//!         Constraint::same_node("/b"),
//!     ))
//!     .with_limit(10);
//! assert_eq!(qom.limit, Some(10));
//! ```

use crate::models::PropertyType;
use serde::{Deserialize, Serialize};

/// A complete query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryObjectModel {
    pub source: Source,
    pub constraint: Option<Constraint>,
    pub orderings: Vec<Ordering>,
    pub columns: Vec<Column>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryObjectModel {
    /// Query over a single selector with no constraint
    pub fn select(node_type: impl Into<String>) -> Self {
        Self {
            source: Source::selector(node_type),
            constraint: None,
            orderings: Vec::new(),
            columns: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn order_by(mut self, operand: DynamicOperand, order: Order) -> Self {
        self.orderings.push(Ordering { operand, order });
        self
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Row source of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    Selector {
        node_type: String,
        alias: Option<String>,
    },
    Join {
        left: Box<Source>,
        right: Box<Source>,
        join_type: JoinType,
    },
}

impl Source {
    pub fn selector(node_type: impl Into<String>) -> Self {
        Source::Selector {
            node_type: node_type.into(),
            alias: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
}

/// Filter tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    And(Box<Constraint>, Box<Constraint>),
    Or(Box<Constraint>, Box<Constraint>),
    Not(Box<Constraint>),
    Comparison {
        left: DynamicOperand,
        operator: Operator,
        right: StaticOperand,
    },
    PropertyExistence {
        selector: Option<String>,
        property: String,
    },
    FullTextSearch {
        selector: Option<String>,
        property: Option<String>,
        expression: String,
    },
    SameNode {
        selector: Option<String>,
        path: String,
    },
    ChildNode {
        selector: Option<String>,
        path: String,
    },
    DescendantNode {
        selector: Option<String>,
        path: String,
    },
}

impl Constraint {
    pub fn and(left: Constraint, right: Constraint) -> Self {
        Constraint::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Constraint, right: Constraint) -> Self {
        Constraint::Or(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Constraint) -> Self {
        Constraint::Not(Box::new(inner))
    }

    pub fn comparison(left: DynamicOperand, operator: Operator, right: Literal) -> Self {
        Constraint::Comparison {
            left,
            operator,
            right: StaticOperand::Literal(right),
        }
    }

    pub fn property_exists(property: impl Into<String>) -> Self {
        Constraint::PropertyExistence {
            selector: None,
            property: property.into(),
        }
    }

    pub fn full_text(property: Option<&str>, expression: impl Into<String>) -> Self {
        Constraint::FullTextSearch {
            selector: None,
            property: property.map(str::to_string),
            expression: expression.into(),
        }
    }

    pub fn same_node(path: impl Into<String>) -> Self {
        Constraint::SameNode {
            selector: None,
            path: path.into(),
        }
    }

    pub fn child_node(path: impl Into<String>) -> Self {
        Constraint::ChildNode {
            selector: None,
            path: path.into(),
        }
    }

    pub fn descendant_node(path: impl Into<String>) -> Self {
        Constraint::DescendantNode {
            selector: None,
            path: path.into(),
        }
    }

    /// Kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::And(..) => "And",
            Constraint::Or(..) => "Or",
            Constraint::Not(_) => "Not",
            Constraint::Comparison { .. } => "Comparison",
            Constraint::PropertyExistence { .. } => "PropertyExistence",
            Constraint::FullTextSearch { .. } => "FullTextSearch",
            Constraint::SameNode { .. } => "SameNode",
            Constraint::ChildNode { .. } => "ChildNode",
            Constraint::DescendantNode { .. } => "DescendantNode",
        }
    }
}

/// Operand evaluated per row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynamicOperand {
    PropertyValue {
        selector: Option<String>,
        property: String,
    },
    Length {
        selector: Option<String>,
        property: String,
    },
    NodeName {
        selector: Option<String>,
    },
    NodeLocalName {
        selector: Option<String>,
    },
    FullTextSearchScore {
        selector: Option<String>,
    },
    LowerCase(Box<DynamicOperand>),
    UpperCase(Box<DynamicOperand>),
}

impl DynamicOperand {
    pub fn property(name: impl Into<String>) -> Self {
        DynamicOperand::PropertyValue {
            selector: None,
            property: name.into(),
        }
    }

    pub fn length(name: impl Into<String>) -> Self {
        DynamicOperand::Length {
            selector: None,
            property: name.into(),
        }
    }

    pub fn node_name() -> Self {
        DynamicOperand::NodeName { selector: None }
    }

    pub fn node_local_name() -> Self {
        DynamicOperand::NodeLocalName { selector: None }
    }

    pub fn lower(inner: DynamicOperand) -> Self {
        DynamicOperand::LowerCase(Box::new(inner))
    }

    pub fn upper(inner: DynamicOperand) -> Self {
        DynamicOperand::UpperCase(Box::new(inner))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DynamicOperand::PropertyValue { .. } => "PropertyValue",
            DynamicOperand::Length { .. } => "Length",
            DynamicOperand::NodeName { .. } => "NodeName",
            DynamicOperand::NodeLocalName { .. } => "NodeLocalName",
            DynamicOperand::FullTextSearchScore { .. } => "FullTextSearchScore",
            DynamicOperand::LowerCase(_) => "LowerCase",
            DynamicOperand::UpperCase(_) => "UpperCase",
        }
    }
}

/// Operand fixed for the whole query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StaticOperand {
    Literal(Literal),
    BindVariable(String),
}

impl StaticOperand {
    pub fn kind(&self) -> &'static str {
        match self {
            StaticOperand::Literal(_) => "Literal",
            StaticOperand::BindVariable(_) => "BindVariable",
        }
    }
}

/// Typed literal in storage text form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Literal {
    pub property_type: PropertyType,
    pub value: String,
}

impl Literal {
    pub fn new(property_type: PropertyType, value: impl Into<String>) -> Self {
        Self {
            property_type,
            value: value.into(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(PropertyType::String, value)
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::new(PropertyType::Name, value)
    }

    pub fn path(value: impl Into<String>) -> Self {
        Self::new(PropertyType::Path, value)
    }

    pub fn long(value: i64) -> Self {
        Self::new(PropertyType::Long, value.to_string())
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(PropertyType::Boolean, if value { "1" } else { "0" })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    EqualTo,
    NotEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
    Like,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::EqualTo => "=",
            Operator::NotEqualTo => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqualTo => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqualTo => "<=",
            Operator::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ordering {
    pub operand: DynamicOperand,
    pub order: Order,
}

/// Requested output column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub selector: Option<String>,
    pub property: String,
    pub column_name: Option<String>,
}

impl Column {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            selector: None,
            property: property.into(),
            column_name: None,
        }
    }

    pub fn named(property: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            selector: None,
            property: property.into(),
            column_name: Some(column_name.into()),
        }
    }

    /// Name the column is reported under
    pub fn output_name(&self) -> &str {
        self.column_name.as_deref().unwrap_or(&self.property)
    }
}
