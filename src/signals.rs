//! Pre/post notifications around bulk operations.
//!
//! Observers register on a `SignalBus` and are called synchronously, in
//! registration order. Delivery is best-effort: an observer returning an
//! error or panicking is logged and skipped, and never fails the write.

use crate::model::{FieldValue, RecordId};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Homogeneous update of a working set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateEvent {
    pub table: String,
    pub identifiers: Vec<RecordId>,
    pub columns: Vec<String>,
    pub rows_affected: Option<u64>,
}

/// Heterogeneous per-row field update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateFieldsEvent {
    pub table: String,
    pub identifiers: Vec<RecordId>,
    pub field_names: Vec<String>,
    pub field_defaults: Vec<(String, FieldValue)>,
    pub batch_size: Option<usize>,
    pub rows_affected: Option<u64>,
    pub returned: Option<Vec<RecordId>>,
}

/// Bulk insert or COPY load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateEvent {
    pub table: String,
    pub record_count: usize,
    pub correlation_tags: Vec<Uuid>,
    pub rows_affected: Option<u64>,
    pub returned: Option<Vec<RecordId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", content = "payload", rename_all = "snake_case")]
pub enum Signal {
    PreUpdate(UpdateEvent),
    PostUpdate(UpdateEvent),
    PreUpdateFields(UpdateFieldsEvent),
    PostUpdateFields(UpdateFieldsEvent),
    PreBulkCreate(CreateEvent),
    PostBulkCreate(CreateEvent),
    PreCopyFrom(CreateEvent),
    PostCopyFrom(CreateEvent),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::PreUpdate(_) => "pre_update",
            Signal::PostUpdate(_) => "post_update",
            Signal::PreUpdateFields(_) => "pre_update_fields",
            Signal::PostUpdateFields(_) => "post_update_fields",
            Signal::PreBulkCreate(_) => "pre_bulk_create",
            Signal::PostBulkCreate(_) => "post_bulk_create",
            Signal::PreCopyFrom(_) => "pre_copy_from_instances",
            Signal::PostCopyFrom(_) => "post_copy_from_instances",
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Signal::PreUpdate(event) | Signal::PostUpdate(event) => &event.table,
            Signal::PreUpdateFields(event) | Signal::PostUpdateFields(event) => &event.table,
            Signal::PreBulkCreate(event)
            | Signal::PostBulkCreate(event)
            | Signal::PreCopyFrom(event)
            | Signal::PostCopyFrom(event) => &event.table,
        }
    }
}

pub trait Observer: Send + Sync {
    fn on_signal(&self, signal: &Signal) -> Result<(), ObserverError>;
}

impl<F> Observer for F
where
    F: Fn(&Signal) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_signal(&self, signal: &Signal) -> Result<(), ObserverError> {
        self(signal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub struct SignalBus {
    observers: RwLock<Vec<(ObserverId, Arc<dyn Observer>)>>,
    next_id: AtomicU64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, observer: impl Observer + 'static) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let observer: Arc<dyn Observer> = Arc::new(observer);
        self.observers.write().push((id, observer));
        id
    }

    /// Returns false when `id` was not connected.
    pub fn disconnect(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn fire(&self, signal: &Signal) {
        // snapshot so observers may connect/disconnect while being notified
        let observers: Vec<Arc<dyn Observer>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        log::trace!(
            "firing {} for {} to {} observers",
            signal.name(),
            signal.table(),
            observers.len()
        );

        for observer in observers {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_signal(signal))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("observer failed handling {}: {}", signal.name(), e);
                }
                Err(_) => {
                    log::error!("observer panicked handling {}", signal.name());
                }
            }
        }
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}
