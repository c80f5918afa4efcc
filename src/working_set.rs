//! Ordered records of one table, the unit every bulk operation acts on.

use crate::error::{BulkError, WriteResult};
use crate::model::{FieldSource, Model, RecordId};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkingSet<M> {
    records: Vec<M>,
}

impl<M> Default for WorkingSet<M> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<M: Model> WorkingSet<M> {
    pub fn new(records: Vec<M>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, M> {
        self.records.iter()
    }

    pub fn records(&self) -> &[M] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [M] {
        &mut self.records
    }

    pub fn into_records(self) -> Vec<M> {
        self.records
    }

    /// Identifiers of every record, in order.
    ///
    /// Fails with `UnsavedRecord` when any record has not been written yet.
    pub fn identifiers(&self) -> WriteResult<Vec<RecordId>> {
        self.records
            .iter()
            .map(|record| {
                record.identifier().ok_or_else(|| BulkError::UnsavedRecord {
                    table: M::schema().table.clone(),
                })
            })
            .collect()
    }

    /// Copies `fields` from `objects` onto the records with the same
    /// identifier. Records without a matching object are left untouched.
    ///
    /// # Returns
    /// Number of records that received values
    pub fn populate_values<S: FieldSource>(
        &mut self,
        objects: &[S],
        fields: &[String],
    ) -> WriteResult<usize> {
        let by_id: HashMap<RecordId, &S> = objects
            .iter()
            .filter_map(|object| object.identifier().map(|id| (id, object)))
            .collect();

        let mut populated = 0;
        for record in &mut self.records {
            let Some(source) = record.identifier().and_then(|id| by_id.get(&id)) else {
                continue;
            };
            for field in fields {
                let value = source.field(field).ok_or_else(|| BulkError::MissingAttribute {
                    field: field.clone(),
                    identifier: source.identifier(),
                })?;
                record.set_field(field, value)?;
            }
            populated += 1;
        }

        log::trace!(
            "populated {} of {} records from {} source objects",
            populated,
            self.records.len(),
            objects.len()
        );
        Ok(populated)
    }
}

impl<M: Model> From<Vec<M>> for WorkingSet<M> {
    fn from(records: Vec<M>) -> Self {
        Self::new(records)
    }
}

impl<M> IntoIterator for WorkingSet<M> {
    type Item = M;
    type IntoIter = std::vec::IntoIter<M>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a, M> IntoIterator for &'a WorkingSet<M> {
    type Item = &'a M;
    type IntoIter = std::slice::Iter<'a, M>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// What a bulk operation hands back: a row count, or the written rows
/// re-read from the store when `return_records` was requested.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkResult<M> {
    Count(u64),
    Records(WorkingSet<M>),
}

impl<M: Model> BulkResult<M> {
    /// Rows written, or rows returned for `Records`.
    pub fn count(&self) -> u64 {
        match self {
            BulkResult::Count(count) => *count,
            BulkResult::Records(set) => set.len() as u64,
        }
    }

    pub fn into_records(self) -> Option<WorkingSet<M>> {
        match self {
            BulkResult::Count(_) => None,
            BulkResult::Records(set) => Some(set),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldValue, HasIdentifier};
    use crate::test_support::Widget;

    struct Update {
        id: RecordId,
        name: &'static str,
    }

    impl HasIdentifier for Update {
        fn identifier(&self) -> Option<RecordId> {
            Some(self.id)
        }
    }

    impl FieldSource for Update {
        fn field(&self, name: &str) -> Option<FieldValue> {
            (name == "name").then(|| self.name.into())
        }
    }

    fn saved(id: RecordId, name: &str) -> Widget {
        let mut widget = Widget::new(name, 1);
        widget.id = Some(id);
        widget
    }

    #[test]
    fn test_populate_values_matches_by_identifier() {
        let mut set = WorkingSet::new(vec![saved(1, "a"), saved(2, "b"), saved(3, "c")]);
        let objects = vec![Update { id: 3, name: "z" }, Update { id: 1, name: "x" }];

        let populated = set.populate_values(&objects, &["name".to_string()]).unwrap();

        assert_eq!(populated, 2);
        let names: Vec<&str> = set.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["x", "b", "z"]);
    }

    #[test]
    fn test_populate_values_rejects_missing_field() {
        let mut set = WorkingSet::new(vec![saved(1, "a")]);
        let objects = vec![Update { id: 1, name: "x" }];
        let err = set
            .populate_values(&objects, &["colour".to_string()])
            .unwrap_err();
        assert!(matches!(err, BulkError::MissingAttribute { identifier: Some(1), .. }));
    }

    #[test]
    fn test_identifiers_require_saved_records() {
        let set = WorkingSet::new(vec![saved(1, "a"), Widget::new("new", 1)]);
        assert!(matches!(
            set.identifiers(),
            Err(BulkError::UnsavedRecord { table }) if table == "widgets"
        ));
    }
}
