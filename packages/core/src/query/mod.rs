//! Query Layer
//!
//! - [`ast`] - Query object model (closed enums, serde-serializable)
//! - [`compiler`] - QOM to SQL with subtype expansion and namespace checks
//! - [`dialect`] - Case functions, concatenation and blob extraction per backend
//! - [`result`] - Reshaped result rows

pub mod ast;
mod compiler;
mod dialect;
mod result;

pub use ast::{
    Column, Constraint, DynamicOperand, JoinType, Literal, Operator, Order, Ordering,
    QueryObjectModel, Source, StaticOperand,
};
pub use compiler::{
    CompiledQuery, NodeTypeLookup, QueryCompiler, QueryError, StaticNodeTypes, PATH_PROPERTY,
    SELECT_COLUMNS,
};
pub use dialect::{quote, Dialect};
pub use result::{QueryColumn, QueryRow, DEFAULT_SCORE, PATH_COLUMN, SCORE_COLUMN};
