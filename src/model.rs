//! Record model: field values, table schemas and the capability traits
//! the bulk engine relies on instead of probing attributes at runtime.

use crate::error::{BulkError, WriteResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary key type of every bulk-writable table.
pub type RecordId = i64;

/// Default name of the correlation column written by bulk inserts and loads.
pub const DEFAULT_CORRELATION_COLUMN: &str = "bm_create_uuid";

/// A single column value as exchanged with a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(value) => Some(*value),
            FieldValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            FieldValue::Uuid(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        FieldValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Storage type of a column; drives text decoding and result decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub default: FieldValue,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: ColumnKind, default: FieldValue) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
        }
    }
}

/// Column metadata for one table.
///
/// The identifier column is always the first column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub id_column: String,
    pub correlation_column: Option<String>,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: "id".to_string(),
            correlation_column: None,
            columns: vec![ColumnDef::new("id", ColumnKind::Int, FieldValue::Null)],
        }
    }

    pub fn with_id_column(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if let Some(id) = self.columns.first_mut() {
            id.name = name.clone();
        }
        self.id_column = name;
        self
    }

    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind, default: FieldValue) -> Self {
        self.columns.push(ColumnDef::new(name, kind, default));
        self
    }

    /// Declares the uuid column bulk inserts tag their rows with.
    pub fn with_correlation_column(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.columns
            .push(ColumnDef::new(name.clone(), ColumnKind::Uuid, FieldValue::Null));
        self.correlation_column = Some(name);
        self
    }

    pub fn supports_correlation_tag(&self) -> bool {
        self.correlation_column.is_some()
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn require_column(&self, name: &str) -> WriteResult<&ColumnDef> {
        self.find_column(name).ok_or_else(|| {
            BulkError::invalid(format!("table {} has no column {}", self.table, name))
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    /// Every column except the identifier, in declared order.
    pub fn data_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|column| column.name != self.id_column)
            .map(|column| column.name.clone())
            .collect()
    }

    pub fn default_value(&self, name: &str) -> WriteResult<FieldValue> {
        Ok(self.require_column(name)?.default.clone())
    }

    pub fn columns_for(&self, names: &[String]) -> WriteResult<Vec<ColumnDef>> {
        names
            .iter()
            .map(|name| self.require_column(name).cloned())
            .collect()
    }
}

/// A materialized row, column values in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<(String, FieldValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Replaces the value of `column`, appending it when absent.
    pub fn set(&mut self, column: &str, value: FieldValue) {
        match self.values.iter_mut().find(|(name, _)| name == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub trait HasIdentifier {
    /// `None` for records that have not been written yet.
    fn identifier(&self) -> Option<RecordId>;
}

/// Anything values can be read from by field name.
pub trait FieldSource: HasIdentifier {
    /// `None` when the object has no such field; `Some(FieldValue::Null)` when
    /// the field exists but is unset.
    fn field(&self, name: &str) -> Option<FieldValue>;
}

pub trait CorrelationTagged {
    fn correlation_tag(&self) -> Option<Uuid>;
    fn set_correlation_tag(&mut self, tag: Uuid);
}

/// A record type bound to one table.
pub trait Model: FieldSource + Clone + Send + Sync + Sized {
    fn schema() -> &'static TableSchema;

    fn set_identifier(&mut self, id: RecordId);

    fn set_field(&mut self, name: &str, value: FieldValue) -> WriteResult<()>;

    fn from_row(row: &Row) -> WriteResult<Self>;

    /// Typed access to the correlation tag; models that declare a
    /// correlation column override this to return `Some(self)`.
    fn correlation_mut(&mut self) -> Option<&mut dyn CorrelationTagged> {
        None
    }

    /// Values for `columns` in order, failing on fields the model lacks.
    fn row_values(&self, columns: &[String]) -> WriteResult<Vec<FieldValue>> {
        columns
            .iter()
            .map(|column| {
                self.field(column).ok_or_else(|| BulkError::MissingAttribute {
                    field: column.clone(),
                    identifier: self.identifier(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new("widgets")
            .column("name", ColumnKind::Text, FieldValue::Text("z".into()))
            .column("quantity", ColumnKind::Int, FieldValue::Int(0))
            .with_correlation_column(DEFAULT_CORRELATION_COLUMN)
    }

    #[test]
    fn test_data_columns_skip_identifier() {
        let schema = schema();
        assert_eq!(
            schema.data_columns(),
            vec!["name", "quantity", DEFAULT_CORRELATION_COLUMN]
        );
        assert_eq!(schema.column_names()[0], "id");
        assert!(schema.supports_correlation_tag());
    }

    #[test]
    fn test_default_value_lookup() {
        let schema = schema();
        assert_eq!(schema.default_value("quantity").unwrap(), FieldValue::Int(0));
        assert!(matches!(
            schema.default_value("missing"),
            Err(BulkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_option_conversion_maps_none_to_null() {
        assert_eq!(FieldValue::from(None::<i64>), FieldValue::Null);
        assert_eq!(FieldValue::from(Some("a")), FieldValue::Text("a".into()));
    }

    #[test]
    fn test_row_set_replaces_existing_value() {
        let mut row = Row::new().with("id", 1i64).with("name", "a");
        row.set("name", FieldValue::Text("b".into()));
        row.set("quantity", FieldValue::Int(3));
        assert_eq!(row.get("name"), Some(&FieldValue::Text("b".into())));
        assert_eq!(row.len(), 3);
    }
}
