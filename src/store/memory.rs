//! In-process tables implementing `Persistence`.
//!
//! Used by the test suite and by callers embedding the writer without a
//! server. Every call takes the table lock once, so a statement is atomic
//! with respect to concurrent workers. Faults can be injected to exercise
//! connection recovery and partial batch failures.

use super::text_format;
use super::{Assignment, Filter, Persistence};
use crate::error::{BulkError, WriteResult};
use crate::model::{FieldValue, RecordId, Row, TableSchema};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct MemoryTable {
    rows: BTreeMap<RecordId, Row>,
    last_id: RecordId,
}

impl MemoryTable {
    fn next_id(&mut self) -> RecordId {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_pings: usize,
    failing_update_ids: BTreeSet<RecordId>,
    failing_insert_value: Option<(String, FieldValue)>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
    faults: Mutex<Faults>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
    update_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    resets: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one entry per executed statement (`"update widgets"`, ...)
    /// to `journal`, so callers can interleave it with their own events.
    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// The next `count` pings fail with a connection fault.
    pub fn fail_next_pings(&self, count: usize) {
        self.faults.lock().failing_pings = count;
    }

    /// Updates whose identifier list contains `id` fail without writing.
    pub fn fail_updates_touching(&self, id: RecordId) {
        self.faults.lock().failing_update_ids.insert(id);
    }

    /// Inserts carrying `value` in `column` fail without writing.
    pub fn fail_inserts_with(&self, column: impl Into<String>, value: impl Into<FieldValue>) {
        self.faults.lock().failing_insert_value = Some((column.into(), value.into()));
    }

    /// Snapshot of every row of `table`, ordered by identifier.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .get(table)
            .map(|table| table.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn record(&self, entry: String) {
        if let Some(journal) = &self.journal {
            journal.lock().push(entry);
        }
    }

    fn default_row(schema: &TableSchema, id: RecordId) -> Row {
        let mut row = Row::new();
        for column in &schema.columns {
            if column.name == schema.id_column {
                row.push(column.name.clone(), id);
            } else {
                row.push(column.name.clone(), column.default.clone());
            }
        }
        row
    }
}

impl Persistence for MemoryStore {
    fn ping(&self) -> WriteResult<()> {
        let mut faults = self.faults.lock();
        if faults.failing_pings > 0 {
            faults.failing_pings -= 1;
            return Err(BulkError::ConnectionFault(
                "server closed the connection unexpectedly".to_string(),
            ));
        }
        Ok(())
    }

    fn reset_connection(&self) -> WriteResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        log::debug!("memory store connection reset");
        Ok(())
    }

    fn update(
        &self,
        schema: &TableSchema,
        ids: &[RecordId],
        assignments: &[Assignment],
    ) -> WriteResult<u64> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        for assignment in assignments {
            schema.require_column(&assignment.column)?;
        }

        let rejected = {
            let faults = self.faults.lock();
            ids.iter()
                .copied()
                .find(|id| faults.failing_update_ids.contains(id))
        };
        if let Some(id) = rejected {
            return Err(BulkError::Storage(format!(
                "update of {} rejected row {}",
                schema.table, id
            )));
        }

        let mut tables = self.tables.lock();
        let table = tables.entry(schema.table.clone()).or_default();
        let targets: BTreeSet<RecordId> = ids.iter().copied().collect();

        let mut affected = 0u64;
        for id in targets {
            let Some(row) = table.rows.get_mut(&id) else {
                continue;
            };
            for assignment in assignments {
                row.set(&assignment.column, assignment.value_for(id).clone());
            }
            affected += 1;
        }
        drop(tables);

        self.record(format!("update {}", schema.table));
        Ok(affected)
    }

    fn insert(
        &self,
        schema: &TableSchema,
        columns: &[String],
        rows: &[Vec<FieldValue>],
    ) -> WriteResult<Vec<RecordId>> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        for column in columns {
            schema.require_column(column)?;
        }

        let rejected = self.faults.lock().failing_insert_value.clone();
        if let Some((column, value)) = rejected {
            let position = columns.iter().position(|c| *c == column);
            if position.is_some_and(|p| rows.iter().any(|row| row.get(p) == Some(&value))) {
                return Err(BulkError::Storage(format!(
                    "insert into {} rejected value {:?} for {}",
                    schema.table, value, column
                )));
            }
        }

        let mut tables = self.tables.lock();
        let table = tables.entry(schema.table.clone()).or_default();
        let mut ids = Vec::with_capacity(rows.len());

        for values in rows {
            if values.len() != columns.len() {
                return Err(BulkError::Storage(format!(
                    "expected {} values, found {}",
                    columns.len(),
                    values.len()
                )));
            }

            let explicit_id = columns
                .iter()
                .zip(values)
                .find(|(column, _)| **column == schema.id_column)
                .and_then(|(_, value)| value.as_i64());
            let id = match explicit_id {
                Some(id) => {
                    table.last_id = table.last_id.max(id);
                    id
                }
                None => table.next_id(),
            };

            let mut row = Self::default_row(schema, id);
            for (column, value) in columns.iter().zip(values) {
                if *column != schema.id_column {
                    row.set(column, value.clone());
                }
            }
            table.rows.insert(id, row);
            ids.push(id);
        }
        drop(tables);

        self.record(format!("insert {}", schema.table));
        Ok(ids)
    }

    fn select(&self, schema: &TableSchema, filter: &Filter) -> WriteResult<Vec<Row>> {
        let tables = self.tables.lock();
        let Some(table) = tables.get(&schema.table) else {
            return Ok(Vec::new());
        };

        let rows = match filter {
            Filter::Ids(ids) => {
                let wanted: BTreeSet<RecordId> = ids.iter().copied().collect();
                wanted
                    .into_iter()
                    .filter_map(|id| table.rows.get(&id).cloned())
                    .collect()
            }
            Filter::Tags { column, tags } => {
                schema.require_column(column)?;
                table
                    .rows
                    .values()
                    .filter(|row| {
                        row.get(column)
                            .and_then(FieldValue::as_uuid)
                            .is_some_and(|tag| tags.contains(&tag))
                    })
                    .cloned()
                    .collect()
            }
        };
        Ok(rows)
    }

    fn copy_in(&self, schema: &TableSchema, columns: &[String], payload: &str) -> WriteResult<u64> {
        let definitions = schema.columns_for(columns)?;
        let rows = text_format::decode_rows(payload, &definitions)?;
        let ids = self.insert(schema, columns, &rows)?;
        self.record(format!("copy_in {}", schema.table));
        Ok(ids.len() as u64)
    }

    fn copy_out(&self, schema: &TableSchema, columns: &[String]) -> WriteResult<String> {
        schema.columns_for(columns)?;
        let rows: Vec<Vec<FieldValue>> = self
            .rows(&schema.table)
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(FieldValue::Null))
                    .collect()
            })
            .collect();

        let mut payload = String::new();
        text_format::encode_rows(rows.iter().map(Vec::as_slice), &mut payload);
        self.record(format!("copy_out {}", schema.table));
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::conditional::ConditionalExpression;
    use crate::model::ColumnKind;

    fn schema() -> TableSchema {
        TableSchema::new("parts")
            .column("name", ColumnKind::Text, FieldValue::from("unnamed"))
            .column("weight", ColumnKind::Int, FieldValue::Int(0))
    }

    fn seed(store: &MemoryStore, names: &[&str]) -> Vec<RecordId> {
        let columns = vec!["name".to_string()];
        let rows: Vec<Vec<FieldValue>> = names.iter().map(|n| vec![FieldValue::from(*n)]).collect();
        store.insert(&schema(), &columns, &rows).unwrap()
    }

    #[test]
    fn test_insert_assigns_ids_and_defaults() {
        let store = MemoryStore::new();
        let ids = seed(&store, &["a", "b"]);
        assert_eq!(ids, vec![1, 2]);

        let rows = store.rows("parts");
        assert_eq!(rows[1].get("name"), Some(&FieldValue::from("b")));
        assert_eq!(rows[1].get("weight"), Some(&FieldValue::Int(0)));
    }

    #[test]
    fn test_conditional_update_counts_matched_rows() {
        let store = MemoryStore::new();
        let ids = seed(&store, &["a", "b", "c"]);
        let expression = ConditionalExpression::new("weight", FieldValue::Int(-1))
            .when(ids[0], FieldValue::Int(10));

        let affected = store
            .update(&schema(), &[ids[0], ids[1], 99], &[Assignment::conditional(expression)])
            .unwrap();

        assert_eq!(affected, 2);
        let rows = store.rows("parts");
        assert_eq!(rows[0].get("weight"), Some(&FieldValue::Int(10)));
        assert_eq!(rows[1].get("weight"), Some(&FieldValue::Int(-1)));
        assert_eq!(rows[2].get("weight"), Some(&FieldValue::Int(0)));
    }

    #[test]
    fn test_copy_round_trip() {
        let store = MemoryStore::new();
        let columns = vec!["name".to_string(), "weight".to_string()];
        let loaded = store
            .copy_in(&schema(), &columns, "bolt\t3\nnut\t\\N\n")
            .unwrap();
        assert_eq!(loaded, 2);

        let payload = store.copy_out(&schema(), &columns).unwrap();
        assert_eq!(payload, "bolt\t3\nnut\t\\N\n");
    }

    #[test]
    fn test_injected_faults() {
        let store = MemoryStore::new();
        store.fail_next_pings(1);
        assert!(store.ping().unwrap_err().is_connection_fault());
        assert!(store.ping().is_ok());

        let ids = seed(&store, &["a"]);
        store.fail_updates_touching(ids[0]);
        let err = store
            .update(&schema(), &ids, &[Assignment::fixed("weight", 5i64)])
            .unwrap_err();
        assert!(matches!(err, BulkError::Storage(_)));
        assert_eq!(store.rows("parts")[0].get("weight"), Some(&FieldValue::Int(0)));
    }
}
