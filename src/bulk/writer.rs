//! Bulk write orchestration.
//!
//! Every operation follows the same pipeline:
//!
//! 1. validate arguments (no I/O, no notifications yet)
//! 2. resolve the batch plan: chunk size, chunk count, concurrency, workers
//! 3. fire the pre-notification
//! 4. check the connection once, reconnecting at most once
//! 5. partition and run one job per chunk, sequentially or on a worker pool
//! 6. aggregate row counts or identifiers
//! 7. re-read the written rows when `return_records` is set
//! 8. fire the post-notification
//!
//! A failure anywhere after step 3 propagates without a post-notification.
//! Chunks already committed stay committed; `BatchFailure` lists them.

use crate::bulk::chunker;
use crate::bulk::conditional::ConditionalExpression;
use crate::bulk::runner::{Job, JobRunner, RunReport};
use crate::bulk::tagging::attach_correlation_tags;
use crate::config::BulkConfig;
use crate::error::{BulkError, WriteResult};
use crate::model::{FieldSource, FieldValue, Model, RecordId, Row, TableSchema};
use crate::signals::{CreateEvent, Signal, SignalBus, UpdateEvent, UpdateFieldsEvent};
use crate::store::text_format;
use crate::store::{Assignment, Filter, Persistence};
use crate::working_set::{BulkResult, WorkingSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-call knobs; anything unset falls back to `BulkConfig`.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub batch_size: Option<usize>,
    pub concurrent: bool,
    pub max_concurrent_workers: Option<usize>,
    pub send_signals: bool,
    pub return_records: bool,
    pub cancel: Option<CancellationToken>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: None,
            concurrent: false,
            max_concurrent_workers: None,
            send_signals: true,
            return_records: false,
            cancel: None,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn max_concurrent_workers(mut self, workers: usize) -> Self {
        self.max_concurrent_workers = Some(workers);
        self
    }

    pub fn send_signals(mut self, send: bool) -> Self {
        self.send_signals = send;
        self
    }

    pub fn return_records(mut self, return_records: bool) -> Self {
        self.return_records = return_records;
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Options specific to COPY-based loading.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Correlation tag for untagged records; generated when `None`.
    pub tag: Option<Uuid>,
    /// Leave the identifier column to the server.
    pub exclude_id: bool,
    /// Columns to load; every column when `None`.
    pub fields: Option<Vec<String>>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            tag: None,
            exclude_id: true,
            fields: None,
        }
    }
}

/// How a batch of `len` items will be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    /// `None` when the whole set goes out as one chunk.
    pub chunk_size: Option<usize>,
    pub chunk_count: usize,
    pub concurrent: bool,
    pub workers: usize,
}

pub struct BulkWriter {
    store: Arc<dyn Persistence>,
    signals: Arc<SignalBus>,
    config: BulkConfig,
}

impl BulkWriter {
    pub fn new(store: Arc<dyn Persistence>, config: BulkConfig) -> Self {
        Self {
            store,
            signals: Arc::new(SignalBus::new()),
            config,
        }
    }

    /// Shares `signals` with other writers.
    pub fn with_signals(mut self, signals: Arc<SignalBus>) -> Self {
        self.signals = signals;
        self
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn Persistence {
        self.store.as_ref()
    }

    /// The plan an operation over `len` records would run with.
    ///
    /// The configured worker count doubles as the chunk cap passed to the
    /// chunker, in both modes, so sequential and concurrent runs partition
    /// identically.
    pub fn plan(&self, len: usize, opts: &WriteOptions) -> WriteResult<BatchPlan> {
        let concurrent = self.config.concurrent(opts.concurrent);
        let setting = self.config.worker_setting(opts.max_concurrent_workers);
        let chunk_size = chunker::effective_chunk_size(len, opts.batch_size, Some(setting))?;

        let chunk_count = match chunk_size {
            None => usize::from(len > 0),
            Some(size) => len.div_ceil(size),
        };
        let workers = if concurrent {
            self.config
                .workers_for(chunk_count, opts.max_concurrent_workers)
        } else {
            1
        };

        Ok(BatchPlan {
            chunk_size,
            chunk_count,
            concurrent,
            workers,
        })
    }

    /// Pings the store, resetting the connection and retrying once on a
    /// connection fault. A second failure propagates.
    pub fn ensure_connected(&self) -> WriteResult<()> {
        match self.store.ping() {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_fault() => {
                log::warn!("connection check failed, reconnecting: {}", e);
                self.store.reset_connection()?;
                self.store.ping()
            }
            Err(e) => Err(e),
        }
    }

    pub fn reset_connection(&self) -> WriteResult<()> {
        self.store.reset_connection()
    }

    /// Reads the rows with the given identifiers, ordered by identifier.
    pub fn fetch<M: Model>(&self, ids: &[RecordId]) -> WriteResult<WorkingSet<M>> {
        if ids.is_empty() {
            return Ok(WorkingSet::default());
        }
        self.select(&Filter::Ids(ids.to_vec()))
    }

    fn select<M: Model>(&self, filter: &Filter) -> WriteResult<WorkingSet<M>> {
        let rows = self.store.select(M::schema(), filter)?;
        let records = rows
            .iter()
            .map(M::from_row)
            .collect::<WriteResult<Vec<M>>>()?;
        Ok(WorkingSet::new(records))
    }

    fn notify(&self, opts: &WriteOptions, signal: impl FnOnce() -> Signal) {
        if opts.send_signals {
            self.signals.fire(&signal());
        }
    }

    /// Partitions `items`, runs `op(offset, chunk)` for every non-empty chunk
    /// according to `plan`, and reports what happened to each chunk.
    fn run_chunks<'a, I, T, F>(
        &self,
        operation: &str,
        items: &'a [I],
        plan: &BatchPlan,
        opts: &WriteOptions,
        op: F,
    ) -> WriteResult<RunReport<T>>
    where
        I: Sync,
        T: Send,
        F: Fn(usize, &'a [I]) -> WriteResult<T> + Sync,
    {
        let setting = self.config.worker_setting(opts.max_concurrent_workers);
        let chunks: Vec<&'a [I]> = chunker::chunk(items, opts.batch_size, Some(setting))?
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .collect();
        let offsets = chunker::chunk_offsets(&chunks);

        log::debug!(
            "{} of {} items: {} chunks of {:?}, {}",
            operation,
            items.len(),
            plan.chunk_count,
            plan.chunk_size,
            if plan.concurrent {
                format!("{} workers", plan.workers)
            } else {
                "sequential".to_string()
            }
        );

        let op = &op;
        let jobs: Vec<Job<'_, T>> = chunks
            .into_iter()
            .zip(offsets)
            .enumerate()
            .map(|(index, (chunk, offset))| Job::new(index, move || op(offset, chunk)))
            .collect();

        let runner = if plan.concurrent {
            JobRunner::concurrent(plan.workers)
        } else {
            JobRunner::sequential()
        }
        .with_cancellation(opts.cancel.clone());

        runner.run(jobs)
    }

    /// Sets every `assignments` column to the same value on every record.
    pub fn update<M: Model>(
        &self,
        set: &WorkingSet<M>,
        assignments: &[Assignment],
        opts: &WriteOptions,
    ) -> WriteResult<BulkResult<M>> {
        let schema = M::schema();
        validate_assignments(schema, assignments)?;
        let ids = set.identifiers()?;
        let plan = self.plan(ids.len(), opts)?;
        let columns: Vec<String> = assignments.iter().map(|a| a.column.clone()).collect();

        self.notify(opts, || {
            Signal::PreUpdate(UpdateEvent {
                table: schema.table.clone(),
                identifiers: ids.clone(),
                columns: columns.clone(),
                rows_affected: None,
            })
        });

        self.ensure_connected()?;
        let outputs = self
            .run_chunks("update", &ids, &plan, opts, |_, chunk| {
                self.store.update(schema, chunk, assignments)
            })?
            .into_outputs(|rows| *rows)?;
        let rows_affected: u64 = outputs.iter().map(|output| output.value).sum();

        let result = if opts.return_records {
            BulkResult::Records(self.fetch(&ids)?)
        } else {
            BulkResult::Count(rows_affected)
        };

        log::info!("updated {} rows of {}", rows_affected, schema.table);
        self.notify(opts, || {
            Signal::PostUpdate(UpdateEvent {
                table: schema.table.clone(),
                identifiers: ids,
                columns,
                rows_affected: Some(rows_affected),
            })
        });
        Ok(result)
    }

    /// Writes each record's own values for `fields` with one conditional
    /// statement per chunk. An empty `fields` means every data column.
    pub fn update_fields<M: Model>(
        &self,
        set: &WorkingSet<M>,
        fields: &[&str],
        opts: &WriteOptions,
    ) -> WriteResult<BulkResult<M>> {
        let schema = M::schema();
        let fields = resolve_fields(schema, fields)?;
        let ids = set.identifiers()?;
        for record in set.iter() {
            for field in &fields {
                if record.field(field).is_none() {
                    return Err(BulkError::MissingAttribute {
                        field: field.clone(),
                        identifier: record.identifier(),
                    });
                }
            }
        }
        let defaults = fields
            .iter()
            .map(|field| Ok((field.clone(), schema.default_value(field)?)))
            .collect::<WriteResult<Vec<(String, FieldValue)>>>()?;
        let plan = self.plan(set.len(), opts)?;

        self.notify(opts, || {
            Signal::PreUpdateFields(UpdateFieldsEvent {
                table: schema.table.clone(),
                identifiers: ids.clone(),
                field_names: fields.clone(),
                field_defaults: defaults.clone(),
                batch_size: opts.batch_size,
                rows_affected: None,
                returned: None,
            })
        });

        self.ensure_connected()?;
        let report = self.run_chunks(
            "update_fields",
            set.records(),
            &plan,
            opts,
            |_, chunk| {
                let chunk_ids = chunk
                    .iter()
                    .map(|record| {
                        record.identifier().ok_or_else(|| BulkError::UnsavedRecord {
                            table: schema.table.clone(),
                        })
                    })
                    .collect::<WriteResult<Vec<RecordId>>>()?;
                let assignments = defaults
                    .iter()
                    .map(|(field, default)| {
                        ConditionalExpression::for_chunk(&schema.table, field, chunk, default.clone())
                            .map(Assignment::conditional)
                    })
                    .collect::<WriteResult<Vec<Assignment>>>()?;
                self.store.update(schema, &chunk_ids, &assignments)
            },
        )?;
        let outputs = report.into_outputs(|rows| *rows)?;
        let rows_affected: u64 = outputs.iter().map(|output| output.value).sum();

        let (result, returned) = if opts.return_records {
            let records = self.fetch::<M>(&ids)?;
            let returned = records.iter().filter_map(|r| r.identifier()).collect();
            (BulkResult::Records(records), Some(returned))
        } else {
            (BulkResult::Count(rows_affected), None)
        };

        log::info!(
            "updated {} fields on {} rows of {}",
            fields.len(),
            rows_affected,
            schema.table
        );
        self.notify(opts, || {
            Signal::PostUpdateFields(UpdateFieldsEvent {
                table: schema.table.clone(),
                identifiers: ids,
                field_names: fields,
                field_defaults: defaults,
                batch_size: opts.batch_size,
                rows_affected: Some(rows_affected),
                returned,
            })
        });
        Ok(result)
    }

    /// Copies `fields` from `objects` onto the matching records, then
    /// writes them as `update_fields` does.
    pub fn update_fields_from<M: Model, S: FieldSource>(
        &self,
        set: &mut WorkingSet<M>,
        objects: &[S],
        fields: &[&str],
        opts: &WriteOptions,
    ) -> WriteResult<BulkResult<M>> {
        let resolved = resolve_fields(M::schema(), fields)?;
        set.populate_values(objects, &resolved)?;
        let names: Vec<&str> = resolved.iter().map(String::as_str).collect();
        self.update_fields(set, &names, opts)
    }

    /// Inserts `records`, tagging untagged ones with `tag` (or one fresh
    /// tag for the call) and writing the new identifiers back onto them.
    pub fn bulk_create<M: Model>(
        &self,
        records: &mut [M],
        tag: Option<Uuid>,
        opts: &WriteOptions,
    ) -> WriteResult<BulkResult<M>> {
        let schema = M::schema();
        let columns = schema.data_columns();
        let plan = self.plan(records.len(), opts)?;
        let tags = attach_correlation_tags(records, tag);
        let rows = records
            .iter()
            .map(|record| record.row_values(&columns))
            .collect::<WriteResult<Vec<Vec<FieldValue>>>>()?;

        self.notify(opts, || {
            Signal::PreBulkCreate(create_event(schema, records.len(), &tags, None, None))
        });

        self.ensure_connected()?;
        let report = self.run_chunks(
            "bulk_create",
            &rows,
            &plan,
            opts,
            |offset, chunk| {
                let ids = self.store.insert(schema, &columns, chunk)?;
                if ids.len() != chunk.len() {
                    return Err(BulkError::Storage(format!(
                        "insert into {} returned {} ids for {} rows",
                        schema.table,
                        ids.len(),
                        chunk.len()
                    )));
                }
                Ok((offset, ids))
            },
        )?;

        // committed chunks keep their identifiers even when siblings failed
        let mut created = Vec::with_capacity(records.len());
        let mut committed: Vec<&(usize, Vec<RecordId>)> =
            report.completed.iter().map(|output| &output.value).collect();
        committed.sort_unstable_by_key(|(offset, _)| *offset);
        for (offset, ids) in committed {
            for (position, id) in ids.iter().enumerate() {
                records[offset + position].set_identifier(*id);
            }
            created.extend_from_slice(ids);
        }

        if let Err(mut err) = report.into_outputs(|(_, ids)| ids.len() as u64) {
            if let BulkError::BatchFailure(failure) = &mut err {
                failure.identifiers = created;
            }
            return Err(err);
        }

        let (result, returned) = self.created_result::<M>(schema, &tags, &created, opts)?;

        log::info!("bulk created {} rows in {}", created.len(), schema.table);
        self.notify(opts, || {
            Signal::PostBulkCreate(create_event(
                schema,
                records.len(),
                &tags,
                Some(created.len() as u64),
                returned,
            ))
        });
        Ok(result)
    }

    /// Loads `records` through the COPY protocol.
    pub fn copy_from_records<M: Model>(
        &self,
        records: &mut [M],
        copy: &CopyOptions,
        opts: &WriteOptions,
    ) -> WriteResult<BulkResult<M>> {
        let schema = M::schema();
        let columns = copy_columns(schema, copy)?;
        if opts.return_records && !schema.supports_correlation_tag() {
            return Err(BulkError::invalid(format!(
                "table {} has no correlation column; loaded rows cannot be returned",
                schema.table
            )));
        }

        let plan = self.plan(records.len(), opts)?;
        let tags = attach_correlation_tags(records, copy.tag);
        let rows = records
            .iter()
            .map(|record| record.row_values(&columns))
            .collect::<WriteResult<Vec<Vec<FieldValue>>>>()?;

        self.notify(opts, || {
            Signal::PreCopyFrom(create_event(schema, records.len(), &tags, None, None))
        });

        self.ensure_connected()?;
        let outputs = self
            .run_chunks("copy_from", &rows, &plan, opts, |_, chunk| {
                let mut payload = String::new();
                text_format::encode_rows(chunk.iter().map(Vec::as_slice), &mut payload);
                self.store.copy_in(schema, &columns, &payload)
            })?
            .into_outputs(|rows| *rows)?;
        let loaded: u64 = outputs.iter().map(|output| output.value).sum();

        let (result, returned) = if opts.return_records {
            self.created_result::<M>(schema, &tags, &[], opts)?
        } else {
            (BulkResult::Count(loaded), None)
        };

        log::info!("copied {} rows into {}", loaded, schema.table);
        self.notify(opts, || {
            Signal::PostCopyFrom(create_event(schema, records.len(), &tags, Some(loaded), returned))
        });
        Ok(result)
    }

    /// Unloads `columns` of every row through the COPY protocol. An empty
    /// `columns` means every column.
    pub fn copy_to_records<M: Model>(&self, columns: &[&str]) -> WriteResult<WorkingSet<M>> {
        let schema = M::schema();
        let columns: Vec<String> = if columns.is_empty() {
            schema.column_names()
        } else {
            columns.iter().map(|column| column.to_string()).collect()
        };
        let definitions = schema.columns_for(&columns)?;

        self.ensure_connected()?;
        let payload = self.store.copy_out(schema, &columns)?;
        let records = text_format::decode_rows(&payload, &definitions)?
            .into_iter()
            .map(|values| {
                let mut row = Row::new();
                for (column, value) in columns.iter().zip(values) {
                    row.push(column.clone(), value);
                }
                M::from_row(&row)
            })
            .collect::<WriteResult<Vec<M>>>()?;

        log::info!("copied {} rows out of {}", records.len(), schema.table);
        Ok(WorkingSet::new(records))
    }

    /// Saves a mix of new and existing records: new ones are bulk created,
    /// existing ones have every data column written back. Returns all of
    /// them re-read from the store, ordered by identifier.
    pub fn create_working_set<M: Model>(
        &self,
        records: Vec<M>,
        opts: &WriteOptions,
    ) -> WriteResult<WorkingSet<M>> {
        let (existing, mut new): (Vec<M>, Vec<M>) = records
            .into_iter()
            .partition(|record| record.identifier().is_some());

        let step_opts = WriteOptions {
            return_records: false,
            ..opts.clone()
        };

        if !new.is_empty() {
            self.bulk_create(&mut new, None, &step_opts)?;
        }

        let existing_ids: Vec<RecordId> = existing.iter().filter_map(|r| r.identifier()).collect();
        if !existing_ids.is_empty() {
            let mut stored = self.fetch::<M>(&existing_ids)?;
            self.update_fields_from(&mut stored, &existing, &[], &step_opts)?;
        }

        let mut ids: Vec<RecordId> = existing_ids;
        ids.extend(new.iter().filter_map(|record| record.identifier()));
        self.fetch(&ids)
    }

    /// Count or re-read rows after an insert or load, preferring the
    /// correlation tags and falling back to identifiers.
    fn created_result<M: Model>(
        &self,
        schema: &TableSchema,
        tags: &BTreeSet<Uuid>,
        ids: &[RecordId],
        opts: &WriteOptions,
    ) -> WriteResult<(BulkResult<M>, Option<Vec<RecordId>>)> {
        if !opts.return_records {
            return Ok((BulkResult::Count(ids.len() as u64), None));
        }

        let records = match &schema.correlation_column {
            Some(column) if !tags.is_empty() => self.select::<M>(&Filter::Tags {
                column: column.clone(),
                tags: tags.iter().copied().collect(),
            })?,
            _ => self.fetch::<M>(ids)?,
        };
        let returned = records.iter().filter_map(|r| r.identifier()).collect();
        Ok((BulkResult::Records(records), Some(returned)))
    }
}

impl std::fmt::Debug for BulkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkWriter")
            .field("config", &self.config)
            .field("signals", &self.signals)
            .finish()
    }
}

fn create_event(
    schema: &TableSchema,
    record_count: usize,
    tags: &BTreeSet<Uuid>,
    rows_affected: Option<u64>,
    returned: Option<Vec<RecordId>>,
) -> CreateEvent {
    CreateEvent {
        table: schema.table.clone(),
        record_count,
        correlation_tags: tags.iter().copied().collect(),
        rows_affected,
        returned,
    }
}

fn validate_assignments(schema: &TableSchema, assignments: &[Assignment]) -> WriteResult<()> {
    if assignments.is_empty() {
        return Err(BulkError::invalid("update requires at least one assignment"));
    }
    for assignment in assignments {
        schema.require_column(&assignment.column)?;
        if assignment.column == schema.id_column {
            return Err(BulkError::invalid(format!(
                "the identifier column {} cannot be updated",
                schema.id_column
            )));
        }
    }
    Ok(())
}

/// Named fields, checked against the schema; every data column when empty.
fn resolve_fields(schema: &TableSchema, fields: &[&str]) -> WriteResult<Vec<String>> {
    if fields.is_empty() {
        return Ok(schema.data_columns());
    }

    let mut resolved: Vec<String> = Vec::with_capacity(fields.len());
    for field in fields {
        schema.require_column(field)?;
        if *field == schema.id_column {
            return Err(BulkError::invalid(format!(
                "the identifier column {} cannot be updated",
                schema.id_column
            )));
        }
        if !resolved.iter().any(|existing| existing == field) {
            resolved.push(field.to_string());
        }
    }
    Ok(resolved)
}

/// Columns a COPY load writes. The correlation column is always included
/// so loaded rows can be found again.
fn copy_columns(schema: &TableSchema, copy: &CopyOptions) -> WriteResult<Vec<String>> {
    let mut columns = match &copy.fields {
        Some(fields) => {
            schema.columns_for(fields)?;
            fields.clone()
        }
        None => schema.column_names(),
    };
    if copy.exclude_id {
        columns.retain(|column| *column != schema.id_column);
    }
    if let Some(tag_column) = &schema.correlation_column {
        if !columns.contains(tag_column) {
            columns.push(tag_column.clone());
        }
    }
    if columns.is_empty() {
        return Err(BulkError::invalid(format!(
            "no columns to copy into {}",
            schema.table
        )));
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::ObserverError;
    use crate::store::MemoryStore;
    use crate::test_support::Widget;

    fn writer(config: BulkConfig) -> BulkWriter {
        BulkWriter::new(Arc::new(MemoryStore::new()), config)
    }

    #[test]
    fn test_plan_grows_chunks_and_floors_workers() {
        let writer = writer(BulkConfig::default());
        let opts = WriteOptions::new()
            .batch_size(10)
            .concurrent(true)
            .max_concurrent_workers(5);

        let plan = writer.plan(100, &opts).unwrap();
        assert_eq!(
            plan,
            BatchPlan {
                chunk_size: Some(11),
                chunk_count: 10,
                concurrent: true,
                workers: 10,
            }
        );
    }

    #[test]
    fn test_plan_sequential_partitions_like_concurrent() {
        let writer = writer(BulkConfig::default());
        let opts = WriteOptions::new().batch_size(10).max_concurrent_workers(5);

        let plan = writer.plan(100, &opts).unwrap();
        assert!(!plan.concurrent);
        assert_eq!(plan.workers, 1);
        assert_eq!(plan.chunk_count, 10);
    }

    #[test]
    fn test_plan_always_concurrent_config() {
        let writer = writer(BulkConfig {
            max_concurrent_batch_writes: 2,
            always_use_concurrent_batch_writes: true,
        });
        let plan = writer.plan(7, &WriteOptions::new().batch_size(3)).unwrap();
        assert!(plan.concurrent);
        assert_eq!(plan.chunk_size, Some(3));
        assert_eq!(plan.chunk_count, 3);
        assert_eq!(plan.workers, 3);
    }

    #[test]
    fn test_plan_unbounded() {
        let writer = writer(BulkConfig::default());
        let plan = writer.plan(12, &WriteOptions::new()).unwrap();
        assert_eq!(plan.chunk_size, None);
        assert_eq!(plan.chunk_count, 1);
        assert_eq!(writer.plan(0, &WriteOptions::new()).unwrap().chunk_count, 0);
    }

    #[test]
    fn test_zero_batch_size_rejected_before_io() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_pings(1);
        let writer = BulkWriter::new(store.clone(), BulkConfig::default());
        let fired = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = fired.clone();
        writer
            .signals()
            .connect(move |signal: &Signal| -> Result<(), ObserverError> {
                sink.lock().push(signal.name());
                Ok(())
            });
        let zero = WriteOptions::new().batch_size(0);

        let mut records = vec![Widget::new("a", 1)];
        let err = writer.bulk_create(&mut records, None, &zero).unwrap_err();
        assert!(matches!(err, BulkError::InvalidArgument(_)));
        assert_eq!(records[0].bm_create_uuid, None);

        let mut loaded = vec![Widget::new("b", 2)];
        let err = writer
            .copy_from_records(&mut loaded, &CopyOptions::default(), &zero)
            .unwrap_err();
        assert!(matches!(err, BulkError::InvalidArgument(_)));
        assert_eq!(loaded[0].bm_create_uuid, None);

        let mut saved = Widget::new("c", 3);
        saved.id = Some(1);
        let set = WorkingSet::new(vec![saved]);
        let err = writer
            .update(&set, &[Assignment::fixed("quantity", 4i64)], &zero)
            .unwrap_err();
        assert!(matches!(err, BulkError::InvalidArgument(_)));
        let err = writer.update_fields(&set, &["quantity"], &zero).unwrap_err();
        assert!(matches!(err, BulkError::InvalidArgument(_)));

        assert!(fired.lock().is_empty());
        assert_eq!(store.resets(), 0);
        assert_eq!(store.insert_calls(), 0);
        assert_eq!(store.update_calls(), 0);
    }

    #[test]
    fn test_resolve_fields() {
        let schema = Widget::schema();
        assert_eq!(resolve_fields(schema, &[]).unwrap(), schema.data_columns());
        assert_eq!(
            resolve_fields(schema, &["name", "name", "quantity"]).unwrap(),
            vec!["name", "quantity"]
        );
        assert!(resolve_fields(schema, &["id"]).is_err());
        assert!(resolve_fields(schema, &["colour"]).is_err());
    }

    #[test]
    fn test_copy_columns_keep_correlation_column() {
        let schema = Widget::schema();
        let copy = CopyOptions {
            fields: Some(vec!["id".to_string(), "name".to_string()]),
            ..CopyOptions::default()
        };
        assert_eq!(
            copy_columns(schema, &copy).unwrap(),
            vec!["name", crate::model::DEFAULT_CORRELATION_COLUMN]
        );

        let with_id = CopyOptions {
            exclude_id: false,
            ..CopyOptions::default()
        };
        assert_eq!(copy_columns(schema, &with_id).unwrap()[0], "id");
    }
}
