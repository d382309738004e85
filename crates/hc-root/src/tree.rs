//! Public types for table column metadata.
//!
//! Column structure travels in Arrow field metadata: [`COUNTER_KEY`] names
//! the counter column of a variable-length column and [`LEAVES_KEY`] records
//! how many leaf descriptors back it (absent means one).

use std::collections::HashMap;

use arrow::datatypes::{DataType, Field, Schema};

/// Field metadata key naming the counter column of a variable-length column.
pub const COUNTER_KEY: &str = "hepconv.counter";

/// Field metadata key holding the number of underlying leaf descriptors.
pub const LEAVES_KEY: &str = "hepconv.leaves";

/// Metadata for a single column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Element type.
    pub data_type: DataType,
    /// Counter column name, for variable-length columns tied to one.
    pub counter: Option<String>,
    /// Number of leaf descriptors (`> 1` is a split column).
    pub leaves: usize,
}

impl ColumnInfo {
    /// Read column metadata from an Arrow field.
    pub fn from_field(field: &Field) -> Self {
        let md = field.metadata();
        let counter = md.get(COUNTER_KEY).filter(|c| !c.is_empty()).cloned();
        let leaves = md.get(LEAVES_KEY).and_then(|v| v.parse().ok()).unwrap_or(1);
        Self { name: field.name().clone(), data_type: field.data_type().clone(), counter, leaves }
    }

    /// `true` if the column holds a variable number of elements per row.
    pub fn is_variable(&self) -> bool {
        matches!(self.data_type, DataType::List(_) | DataType::LargeList(_))
    }

    /// `true` if the column is backed by more than one leaf descriptor.
    pub fn is_split(&self) -> bool {
        self.leaves > 1
    }
}

/// A table's column list.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Columns in storage order.
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Column metadata for every field of `schema`.
    pub fn from_schema(name: impl Into<String>, schema: &Schema) -> Self {
        let columns = schema.fields().iter().map(|f| ColumnInfo::from_field(f)).collect();
        Self { name: name.into(), columns }
    }

    /// Find a column by name.
    pub fn find_column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// All column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Metadata map marking a column as counted by `counter`.
pub fn counted_metadata(counter: &str) -> HashMap<String, String> {
    HashMap::from([(COUNTER_KEY.to_string(), counter.to_string())])
}
