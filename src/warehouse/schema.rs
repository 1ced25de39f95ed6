use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::data::StockRecord;

/// Fully qualified BigQuery table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// `project.dataset.table`
    pub fn qualified(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset_id, self.table_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Date,
    Float,
    Integer,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Required,
    Nullable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub mode: FieldMode,
}

impl SchemaField {
    fn new(name: &str, field_type: FieldType, mode: FieldMode) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<SchemaField>,
}

/// The eight-column layout of the price table.
///
/// Used both when creating the table and in every load job, so a table
/// created by hand with a different layout makes the load fail instead of
/// silently widening.
pub fn price_table_schema() -> TableSchema {
    use FieldMode::*;
    use FieldType::*;

    TableSchema {
        fields: vec![
            SchemaField::new("Date", Date, Required),
            SchemaField::new("Open", Float, Nullable),
            SchemaField::new("High", Float, Nullable),
            SchemaField::new("Low", Float, Nullable),
            SchemaField::new("Close", Float, Nullable),
            SchemaField::new("Adj_Close", Float, Nullable),
            SchemaField::new("Volume", Integer, Nullable),
            SchemaField::new("Ticker", String, Required),
        ],
    }
}

/// Encodes rows as newline-delimited JSON, the load job's source format.
pub fn to_ndjson(records: &[StockRecord]) -> Result<String> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}
