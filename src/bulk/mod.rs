//! Concurrent batched write engine.
//!
//! A bulk call moves through these pieces:
//!
//! 1. **Chunker** (`chunker`) - Cuts the working set into contiguous chunks
//! 2. **Runner** (`runner`) - Executes one job per chunk inline or on a bounded rayon pool
//! 3. **Conditional updates** (`conditional`) - Folds per-row values into one `CASE` per column
//! 4. **Tagging** (`tagging`) - Shares one correlation uuid across a bulk insert
//! 5. **Writer** (`writer`) - Validates, notifies, plans and aggregates each operation
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use bulkmodel::bulk::{BulkWriter, WriteOptions};
//! use bulkmodel::{BulkConfig, PgStore, StoreConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(PgStore::connect(&StoreConfig::from_env())?);
//! let writer = BulkWriter::new(store, BulkConfig::from_env());
//!
//! let opts = WriteOptions::new().batch_size(500).concurrent(true);
//! let created = writer.bulk_create(&mut widgets, None, &opts)?;
//! println!("created {} widgets", created.count());
//! ```

pub mod chunker;
pub mod conditional;
pub mod runner;
pub mod tagging;
pub mod writer;

pub use conditional::ConditionalExpression;
pub use runner::{ExecutionMode, JobRunner};
pub use writer::{BatchPlan, BulkWriter, CopyOptions, WriteOptions};
