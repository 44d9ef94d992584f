use crate::models::Property;
use serde::{Deserialize, Serialize};

/// Column name carrying the node path on every row
pub const PATH_COLUMN: &str = "jcr:path";

/// Column name carrying the relevance score on every row
pub const SCORE_COLUMN: &str = "jcr:score";

/// Score reported for every row; full-text ranking is not computed
pub const DEFAULT_SCORE: f64 = 1.0;

/// One named output column; `None` when the node lacks the property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryColumn {
    pub name: String,
    pub value: Option<Property>,
}

/// One result row in requested column order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub columns: Vec<QueryColumn>,
}

impl QueryRow {
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.value.as_ref())
    }

    pub fn path(&self) -> Option<&str> {
        self.get(PATH_COLUMN).and_then(|p| p.first_str())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
