//! Database connection traits and the scoped connection guard

use async_trait::async_trait;
use dictum_core::{
    DbStatus, DictumResult, EntityInstance, Operation, TabularBlock, ValueMap,
};
use serde_json::Value;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// One outbound database command for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub entity: String,
    pub operation: Operation,
    pub subname: Option<String>,
    /// Values of the participating columns.
    pub values: ValueMap,
    /// Primary key column names.
    pub key_columns: Vec<String>,
    pub autonum_column: Option<String>,
    pub description_column: Option<String>,
}

impl Command {
    /// Build a command from an instance's current column state.
    pub fn for_instance(instance: &EntityInstance, operation: Operation, subname: Option<&str>) -> Self {
        let columns = instance.columns();
        Self {
            entity: instance.name().to_string(),
            operation,
            subname: subname.map(str::to_string),
            values: columns.outbound(operation),
            key_columns: columns.key_names(),
            autonum_column: columns.autonum().map(|c| c.name.clone()),
            description_column: instance.definition().description_column.clone(),
        }
    }

    /// Key column values present on this command.
    pub fn key_values(&self) -> ValueMap {
        self.key_columns
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

/// A database handle scoped to one request.
///
/// Per-record database outcomes come back as [`DbStatus`] values; `Err` is
/// reserved for transport and protocol faults.
#[async_trait]
pub trait Connection: Send {
    /// Fetch one record by key (`get`).
    async fn fetch(&mut self, command: &Command) -> DictumResult<Option<ValueMap>>;

    /// Run a write or status-returning command (insert, update, delete,
    /// process, action).
    async fn execute(&mut self, command: &Command) -> DictumResult<Vec<DbStatus>>;

    /// Run a data-returning command (view, proc).
    async fn query(&mut self, command: &Command) -> DictumResult<Vec<TabularBlock>>;

    /// Resolve a record's description column (`lookup`).
    async fn lookup(&mut self, command: &Command) -> DictumResult<Option<Value>>;

    /// Give the handle back. Called exactly once, from the scope guard.
    fn release(&mut self);
}

/// Yields scoped connections per application.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open(&self, app_id: &str) -> DictumResult<Box<dyn Connection>>;

    /// Readiness probe.
    async fn ping(&self) -> DictumResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: ConnectionFactory + ?Sized> ConnectionFactory for Arc<T> {
    async fn open(&self, app_id: &str) -> DictumResult<Box<dyn Connection>> {
        (**self).open(app_id).await
    }

    async fn ping(&self) -> DictumResult<()> {
        (**self).ping().await
    }
}

/// Releases its connection when dropped, on every exit path.
pub struct ScopedConnection {
    inner: Box<dyn Connection>,
}

impl ScopedConnection {
    pub async fn open(factory: &dyn ConnectionFactory, app_id: &str) -> DictumResult<Self> {
        let inner = factory.open(app_id).await?;
        Ok(Self { inner })
    }
}

impl Deref for ScopedConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for ScopedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        self.inner.release();
        tracing::trace!("connection released");
    }
}
