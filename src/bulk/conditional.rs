//! Per-row values collapsed into one server-side `CASE` expression.

use crate::error::{BulkError, WriteResult};
use crate::model::{FieldSource, FieldValue, RecordId};

/// `CASE id WHEN <id> THEN <value> ... ELSE <default> END` for one column.
///
/// Null source values never produce a branch: a row whose value is null
/// takes the default like any row without a branch. Setting a column to
/// null through a conditional update is therefore not possible; use a
/// homogeneous update for that.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalExpression {
    column: String,
    branches: Vec<(RecordId, FieldValue)>,
    default: FieldValue,
}

impl ConditionalExpression {
    pub fn new(column: impl Into<String>, default: FieldValue) -> Self {
        Self {
            column: column.into(),
            branches: Vec::new(),
            default,
        }
    }

    /// Adds a branch; null values are ignored.
    pub fn when(mut self, id: RecordId, value: FieldValue) -> Self {
        self.push(id, value);
        self
    }

    fn push(&mut self, id: RecordId, value: FieldValue) {
        if value.is_null() {
            return;
        }
        match self.branches.iter_mut().find(|(existing, _)| *existing == id) {
            Some(branch) => branch.1 = value,
            None => self.branches.push((id, value)),
        }
    }

    /// Builds the expression for `column` from the values held by `records`.
    pub fn for_chunk<R: FieldSource>(
        table: &str,
        column: &str,
        records: &[R],
        default: FieldValue,
    ) -> WriteResult<Self> {
        let mut expression = Self::new(column, default);

        for record in records {
            let id = record.identifier().ok_or_else(|| BulkError::UnsavedRecord {
                table: table.to_string(),
            })?;
            let value = record.field(column).ok_or_else(|| BulkError::MissingAttribute {
                field: column.to_string(),
                identifier: Some(id),
            })?;
            expression.push(id, value);
        }

        Ok(expression)
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn branches(&self) -> &[(RecordId, FieldValue)] {
        &self.branches
    }

    pub fn default_value(&self) -> &FieldValue {
        &self.default
    }

    /// The value a row with identifier `id` receives.
    pub fn evaluate(&self, id: RecordId) -> &FieldValue {
        self.branches
            .iter()
            .find(|(branch_id, _)| *branch_id == id)
            .map(|(_, value)| value)
            .unwrap_or(&self.default)
    }
}
