use crate::model::RecordId;
use std::fmt;
use thiserror::Error;

pub type WriteResult<T> = Result<T, BulkError>;

/// Errors raised by the bulk write engine and its stores.
#[derive(Debug, Error)]
pub enum BulkError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("attempting to update an unsaved record in table {table}")]
    UnsavedRecord { table: String },
    #[error("attribute {field} does not exist on source object {identifier:?}")]
    MissingAttribute {
        field: String,
        identifier: Option<RecordId>,
    },
    #[error("connection fault: {0}")]
    ConnectionFault(String),
    #[error("{0}")]
    BatchFailure(BatchFailure),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("copy payload line {line}: {message}")]
    Decode { line: usize, message: String },
    #[error("job for chunk {chunk} panicked: {message}")]
    JobPanicked { chunk: usize, message: String },
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

impl BulkError {
    pub fn invalid(message: impl Into<String>) -> Self {
        BulkError::InvalidArgument(message.into())
    }

    /// True for faults the connection check may recover from by reconnecting.
    pub fn is_connection_fault(&self) -> bool {
        match self {
            BulkError::ConnectionFault(_) => true,
            BulkError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

/// A single chunk that failed inside a batch.
#[derive(Debug)]
pub struct ChunkFailure {
    pub chunk: usize,
    pub error: BulkError,
}

/// One or more jobs of a batch failed or never ran.
///
/// Chunks listed in `completed_chunks` were committed; there is no rollback.
#[derive(Debug, Default)]
pub struct BatchFailure {
    pub failures: Vec<ChunkFailure>,
    pub completed_chunks: Vec<usize>,
    pub cancelled_chunks: Vec<usize>,
    pub rows_affected: u64,
    /// Identifiers of rows created by the committed chunks of an insert.
    pub identifiers: Vec<RecordId>,
}

impl BatchFailure {
    pub fn first_error(&self) -> Option<&BulkError> {
        self.failures.first().map(|failure| &failure.error)
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch failed: {} chunk(s) failed, {} cancelled, {} committed ({} rows)",
            self.failures.len(),
            self.cancelled_chunks.len(),
            self.completed_chunks.len(),
            self.rows_affected
        )?;
        if let Some(first) = self.failures.first() {
            write!(f, "; first failure in chunk {}: {}", first.chunk, first.error)?;
        }
        Ok(())
    }
}

impl From<BatchFailure> for BulkError {
    fn from(failure: BatchFailure) -> Self {
        BulkError::BatchFailure(failure)
    }
}
