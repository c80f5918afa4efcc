//! Persistence contract consumed by the bulk writer.
//!
//! Every method is a single blocking, chunk-level primitive; chunking,
//! concurrency and notifications live in `bulk::writer`. Implementations
//! must be safe to call from several worker threads at once and must give
//! each call its own connection.
//!
//! - `postgres`: sqlx/PostgreSQL, `UPDATE ... CASE`, multi-row `INSERT`,
//!   `COPY ... FROM STDIN` / `COPY ... TO STDOUT`
//! - `memory`: in-process tables for tests and embedding
//! - `text_format`: the COPY text codec shared by both

pub mod memory;
pub mod postgres;
pub mod text_format;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::bulk::conditional::ConditionalExpression;
use crate::error::WriteResult;
use crate::model::{FieldValue, RecordId, Row, TableSchema};
use uuid::Uuid;

/// Right-hand side of one `SET column = ...`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateValue {
    Fixed(FieldValue),
    Conditional(ConditionalExpression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: UpdateValue,
}

impl Assignment {
    pub fn fixed(column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            column: column.into(),
            value: UpdateValue::Fixed(value.into()),
        }
    }

    pub fn conditional(expression: ConditionalExpression) -> Self {
        Self {
            column: expression.column().to_string(),
            value: UpdateValue::Conditional(expression),
        }
    }

    /// Value a row with identifier `id` receives.
    pub fn value_for(&self, id: RecordId) -> &FieldValue {
        match &self.value {
            UpdateValue::Fixed(value) => value,
            UpdateValue::Conditional(expression) => expression.evaluate(id),
        }
    }
}

/// Row selection used to re-materialize written rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Ids(Vec<RecordId>),
    Tags { column: String, tags: Vec<Uuid> },
}

pub trait Persistence: Send + Sync {
    /// Round trip proving a connection is usable.
    fn ping(&self) -> WriteResult<()>;

    /// Drops current connections; the next call reconnects lazily.
    fn reset_connection(&self) -> WriteResult<()>;

    /// `UPDATE table SET ... WHERE id IN ids`; returns rows affected.
    fn update(
        &self,
        schema: &TableSchema,
        ids: &[RecordId],
        assignments: &[Assignment],
    ) -> WriteResult<u64>;

    /// Multi-row insert; returns assigned identifiers in row order.
    fn insert(
        &self,
        schema: &TableSchema,
        columns: &[String],
        rows: &[Vec<FieldValue>],
    ) -> WriteResult<Vec<RecordId>>;

    /// Rows matching `filter`, every schema column, ordered by identifier.
    fn select(&self, schema: &TableSchema, filter: &Filter) -> WriteResult<Vec<Row>>;

    /// Streams a COPY text payload into `columns`; returns rows loaded.
    fn copy_in(&self, schema: &TableSchema, columns: &[String], payload: &str) -> WriteResult<u64>;

    /// Dumps `columns` of every row as a COPY text payload.
    fn copy_out(&self, schema: &TableSchema, columns: &[String]) -> WriteResult<String>;
}
