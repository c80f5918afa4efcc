pub mod bulk;
pub mod config;
pub mod error;
pub mod model;
pub mod signals;
pub mod store;
pub mod working_set;

pub use bulk::{BatchPlan, BulkWriter, ConditionalExpression, CopyOptions, WriteOptions};
pub use config::{BulkConfig, StoreConfig};
pub use error::{BatchFailure, BulkError, ChunkFailure, WriteResult};
pub use model::{
    ColumnDef, ColumnKind, CorrelationTagged, FieldSource, FieldValue, HasIdentifier, Model,
    RecordId, Row, TableSchema,
};
pub use signals::{Observer, ObserverId, Signal, SignalBus};
pub use store::{Assignment, Filter, MemoryStore, Persistence, PgStore};
pub use working_set::{BulkResult, WorkingSet};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Installs `env_logger` once per process. `RUST_LOG` overrides the
/// default `info,sqlx=warn` filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();
    });
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::error::{BulkError, WriteResult};
    use crate::model::{
        ColumnKind, CorrelationTagged, DEFAULT_CORRELATION_COLUMN, FieldSource, FieldValue,
        HasIdentifier, Model, RecordId, Row, TableSchema,
    };
    use std::sync::LazyLock;
    use uuid::Uuid;

    pub use database::{TestDatabase, TestDatabaseError};

    /// DDL matching `Widget::schema()`.
    pub const WIDGETS_DDL: &str = r#"CREATE TABLE widgets (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL DEFAULT 'unnamed',
        quantity BIGINT NOT NULL DEFAULT 0,
        note TEXT DEFAULT 'n/a',
        active BOOLEAN NOT NULL DEFAULT true,
        bm_create_uuid UUID
    )"#;

    static WIDGET_SCHEMA: LazyLock<TableSchema> = LazyLock::new(|| {
        TableSchema::new("widgets")
            .column("name", ColumnKind::Text, FieldValue::from("unnamed"))
            .column("quantity", ColumnKind::Int, FieldValue::Int(0))
            .column("note", ColumnKind::Text, FieldValue::from("n/a"))
            .column("active", ColumnKind::Bool, FieldValue::Bool(true))
            .with_correlation_column(DEFAULT_CORRELATION_COLUMN)
    });

    /// Fixture record bound to the `widgets` table.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Widget {
        pub id: Option<RecordId>,
        pub name: String,
        pub quantity: i64,
        pub note: Option<String>,
        pub active: bool,
        pub bm_create_uuid: Option<Uuid>,
    }

    impl Widget {
        pub fn new(name: &str, quantity: i64) -> Self {
            Self {
                id: None,
                name: name.to_string(),
                quantity,
                note: None,
                active: true,
                bm_create_uuid: None,
            }
        }

        pub fn with_note(mut self, note: &str) -> Self {
            self.note = Some(note.to_string());
            self
        }
    }

    fn mismatch(field: &str, value: &FieldValue) -> BulkError {
        BulkError::invalid(format!("widgets.{field} cannot hold {value:?}"))
    }

    impl HasIdentifier for Widget {
        fn identifier(&self) -> Option<RecordId> {
            self.id
        }
    }

    impl FieldSource for Widget {
        fn field(&self, name: &str) -> Option<FieldValue> {
            let value = match name {
                "id" => self.id.into(),
                "name" => self.name.clone().into(),
                "quantity" => self.quantity.into(),
                "note" => self.note.clone().into(),
                "active" => self.active.into(),
                DEFAULT_CORRELATION_COLUMN => self.bm_create_uuid.into(),
                _ => return None,
            };
            Some(value)
        }
    }

    impl CorrelationTagged for Widget {
        fn correlation_tag(&self) -> Option<Uuid> {
            self.bm_create_uuid
        }

        fn set_correlation_tag(&mut self, tag: Uuid) {
            self.bm_create_uuid = Some(tag);
        }
    }

    impl Model for Widget {
        fn schema() -> &'static TableSchema {
            &WIDGET_SCHEMA
        }

        fn set_identifier(&mut self, id: RecordId) {
            self.id = Some(id);
        }

        fn set_field(&mut self, name: &str, value: FieldValue) -> WriteResult<()> {
            match (name, &value) {
                ("id", FieldValue::Int(id)) => self.id = Some(*id),
                ("id", FieldValue::Null) => self.id = None,
                ("name", FieldValue::Text(text)) => self.name = text.clone(),
                ("quantity", FieldValue::Int(quantity)) => self.quantity = *quantity,
                ("note", FieldValue::Text(text)) => self.note = Some(text.clone()),
                ("note", FieldValue::Null) => self.note = None,
                ("active", FieldValue::Bool(active)) => self.active = *active,
                (DEFAULT_CORRELATION_COLUMN, FieldValue::Uuid(tag)) => {
                    self.bm_create_uuid = Some(*tag)
                }
                (DEFAULT_CORRELATION_COLUMN, FieldValue::Null) => self.bm_create_uuid = None,
                _ => return Err(mismatch(name, &value)),
            }
            Ok(())
        }

        /// Columns missing from `row` keep their `Widget::new` values.
        fn from_row(row: &Row) -> WriteResult<Self> {
            let mut widget = Widget::new("unnamed", 0);
            for (column, value) in row.iter() {
                widget.set_field(column, value.clone())?;
            }
            Ok(widget)
        }

        fn correlation_mut(&mut self) -> Option<&mut dyn CorrelationTagged> {
            Some(self)
        }
    }

    pub mod database {
        use log::LevelFilter;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use sqlx::{ConnectOptions, PgPool};
        use testcontainers::ImageExt;
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use uuid::Uuid;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("test database pool already closed")]
            Closed,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database in a disposable Postgres container.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Launch a container and create a uniquely named database in it.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().with_tag("16-alpine").start().await?;
                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let base_options: PgConnectOptions = admin_url.parse()?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(base_options.clone())
                    .await?;

                let database_name = format!("bulkmodel_{}", Uuid::new_v4().simple());
                sqlx::query(&format!(
                    "CREATE DATABASE \"{}\" TEMPLATE template0",
                    database_name
                ))
                .execute(&admin_pool)
                .await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(16)
                    .connect_with(base_options.database(&database_name))
                    .await?;

                Ok(Self {
                    pool: Some(pool),
                    database_name,
                    container: Some(container),
                })
            }

            pub fn pool(&self) -> Result<&PgPool, TestDatabaseError> {
                self.pool.as_ref().ok_or(TestDatabaseError::Closed)
            }

            pub fn database_name(&self) -> &str {
                &self.database_name
            }

            /// Run each statement of `ddl` in order.
            pub async fn execute_all(&self, ddl: &[&str]) -> Result<(), TestDatabaseError> {
                let pool = self.pool()?;
                for statement in ddl {
                    sqlx::query(statement).execute(pool).await?;
                }
                Ok(())
            }

            /// Close the pool and stop the container.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }
                if let Some(container) = self.container.take() {
                    container.stop().await?;
                }
                Ok(())
            }
        }
    }
}
