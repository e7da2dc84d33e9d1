//! In-memory database for development and tests
//!
//! Keeps one table per entity and answers commands the way the SQL functions
//! do: inserts report `RECORD_EXISTS` on key collision and `AUTONUM` when a
//! key is generated, updates and deletes report `RECORD_NOT_FOUND` when no
//! row matches. Procedures, views and actions are answered by registered
//! handlers. Every opened and released connection is counted.

use async_trait::async_trait;
use dashmap::DashMap;
use dictum_core::{
    DbStatus, DictumResult, LogicalType, Operation, StorageError, TabularBlock, ValueMap,
};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::connection::{Command, Connection, ConnectionFactory};

type QueryHandler = Arc<dyn Fn(&Command) -> DictumResult<Vec<TabularBlock>> + Send + Sync>;
type ExecuteHandler = Arc<dyn Fn(&Command) -> Vec<DbStatus> + Send + Sync>;
type Interceptor = Arc<dyn Fn(&Command) -> Option<DbStatus> + Send + Sync>;

#[derive(Debug, Default)]
struct Table {
    rows: Vec<ValueMap>,
    last_autonum: i64,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<HashMap<String, Table>>,
    query_handlers: DashMap<(String, String), QueryHandler>,
    execute_handlers: DashMap<(String, String), ExecuteHandler>,
    interceptors: DashMap<String, Interceptor>,
    commands: Mutex<Vec<Command>>,
    opened: AtomicUsize,
    released: AtomicUsize,
    latency_ms: AtomicU64,
    unavailable: AtomicBool,
}

fn member_key(entity: &str, name: &str) -> (String, String) {
    (entity.to_ascii_lowercase(), name.to_ascii_lowercase())
}

fn lock<T>(mutex: &Mutex<T>) -> DictumResult<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| StorageError::LockPoisoned.into())
}

/// In-memory database; clones share state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("opened", &self.opened())
            .field("released", &self.released())
            .finish()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to an entity's table.
    pub fn seed(&self, entity: &str, rows: Vec<ValueMap>) -> DictumResult<()> {
        let mut tables = lock(&self.shared.tables)?;
        tables
            .entry(entity.to_ascii_lowercase())
            .or_default()
            .rows
            .extend(rows);
        Ok(())
    }

    pub fn rows(&self, entity: &str) -> Vec<ValueMap> {
        lock(&self.shared.tables)
            .map(|tables| {
                tables
                    .get(&entity.to_ascii_lowercase())
                    .map(|t| t.rows.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Answer `view`/`proc` commands for `entity`.`name`.
    pub fn on_query<F>(&self, entity: &str, name: &str, handler: F)
    where
        F: Fn(&Command) -> DictumResult<Vec<TabularBlock>> + Send + Sync + 'static,
    {
        self.shared
            .query_handlers
            .insert(member_key(entity, name), Arc::new(handler));
    }

    /// Answer `process`/`action` commands for `entity`.`name`.
    pub fn on_execute<F>(&self, entity: &str, name: &str, handler: F)
    where
        F: Fn(&Command) -> Vec<DbStatus> + Send + Sync + 'static,
    {
        self.shared
            .execute_handlers
            .insert(member_key(entity, name), Arc::new(handler));
    }

    /// Short-circuit writes on `entity`: a returned status replaces the
    /// table operation.
    pub fn intercept<F>(&self, entity: &str, interceptor: F)
    where
        F: Fn(&Command) -> Option<DbStatus> + Send + Sync + 'static,
    {
        self.shared
            .interceptors
            .insert(entity.to_ascii_lowercase(), Arc::new(interceptor));
    }

    /// Delay every command, making each one a real suspension point.
    pub fn set_latency(&self, latency: Duration) {
        self.shared
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.shared.commands)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.opened().saturating_sub(self.released())
    }
}

#[async_trait]
impl ConnectionFactory for MemoryDatabase {
    async fn open(&self, app_id: &str) -> DictumResult<Box<dyn Connection>> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionUnavailable {
                reason: "memory database marked unavailable".to_string(),
            }
            .into());
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(app_id = %app_id, "memory connection opened");
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            released: false,
        }))
    }

    async fn ping(&self) -> DictumResult<()> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionUnavailable {
                reason: "memory database marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    released: bool,
}

fn matches_keys(row: &ValueMap, keys: &ValueMap) -> bool {
    !keys.is_empty() && keys.iter().all(|(k, v)| row.get(k) == Some(v))
}

fn table_block(rows: &[ValueMap]) -> TabularBlock {
    let header: Vec<String> = rows
        .iter()
        .flat_map(|r| r.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut block = TabularBlock::new(header.clone(), vec![LogicalType::Json; header.len()]);
    block.records = rows
        .iter()
        .map(|row| {
            header
                .iter()
                .map(|h| row.get(h).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    block
}

impl MemoryConnection {
    async fn begin(&self, command: &Command) -> DictumResult<()> {
        if self.released {
            return Err(StorageError::ConnectionUnavailable {
                reason: "connection already released".to_string(),
            }
            .into());
        }
        let latency = self.shared.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        lock(&self.shared.commands)?.push(command.clone());
        Ok(())
    }

    fn not_supported(command: &Command) -> dictum_core::DictumError {
        StorageError::CommandFailed {
            entity: command.entity.clone(),
            reason: format!("{} is not supported here", command.operation),
        }
        .into()
    }

    fn missing_handler(command: &Command) -> dictum_core::DictumError {
        StorageError::CommandFailed {
            entity: command.entity.clone(),
            reason: format!(
                "no handler for {} '{}'",
                command.operation,
                command.subname.as_deref().unwrap_or_default()
            ),
        }
        .into()
    }

    fn write(&self, command: &Command) -> DictumResult<DbStatus> {
        let mut tables = lock(&self.shared.tables)?;
        let table = tables.entry(command.entity.to_ascii_lowercase()).or_default();
        let keys = command.key_values();

        let status = match command.operation {
            Operation::Insert => {
                if table.rows.iter().any(|row| matches_keys(row, &keys)) {
                    return Ok(DbStatus::record_exists(format!(
                        "{} already exists",
                        command.entity
                    )));
                }
                let mut row = command.values.clone();
                match &command.autonum_column {
                    Some(column) => {
                        table.last_autonum += 1;
                        row.insert(column.clone(), Value::from(table.last_autonum));
                        table.rows.push(row);
                        DbStatus::autonum(table.last_autonum.to_string())
                    }
                    None => {
                        table.rows.push(row);
                        DbStatus::ok()
                    }
                }
            }
            Operation::Update => match table.rows.iter_mut().find(|row| matches_keys(row, &keys)) {
                Some(row) => {
                    row.extend(command.values.clone());
                    DbStatus::ok()
                }
                None => DbStatus::new(dictum_core::codes::RECORD_NOT_FOUND, "no matching record"),
            },
            Operation::Delete => {
                let before = table.rows.len();
                table.rows.retain(|row| !matches_keys(row, &keys));
                if table.rows.len() < before {
                    DbStatus::ok()
                } else {
                    DbStatus::new(dictum_core::codes::RECORD_NOT_FOUND, "no matching record")
                }
            }
            _ => return Err(Self::not_supported(command)),
        };
        Ok(status)
    }

    fn find(&self, command: &Command) -> DictumResult<Option<ValueMap>> {
        let tables = lock(&self.shared.tables)?;
        let keys = command.key_values();
        Ok(tables
            .get(&command.entity.to_ascii_lowercase())
            .and_then(|t| t.rows.iter().find(|row| matches_keys(row, &keys)))
            .cloned())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn fetch(&mut self, command: &Command) -> DictumResult<Option<ValueMap>> {
        self.begin(command).await?;
        self.find(command)
    }

    async fn execute(&mut self, command: &Command) -> DictumResult<Vec<DbStatus>> {
        self.begin(command).await?;

        let interceptor = self
            .shared
            .interceptors
            .get(&command.entity.to_ascii_lowercase())
            .map(|i| Arc::clone(i.value()));
        if let Some(status) = interceptor.and_then(|intercept| intercept(command)) {
            return Ok(vec![status]);
        }

        match command.operation {
            Operation::Insert | Operation::Update | Operation::Delete => Ok(vec![self.write(command)?]),
            Operation::Process | Operation::Action | Operation::Import => {
                let name = command.subname.as_deref().unwrap_or_default();
                let handler = self
                    .shared
                    .execute_handlers
                    .get(&member_key(&command.entity, name))
                    .map(|h| Arc::clone(h.value()));
                match handler {
                    Some(handler) => Ok(handler(command)),
                    None => Err(Self::missing_handler(command)),
                }
            }
            _ => Err(Self::not_supported(command)),
        }
    }

    async fn query(&mut self, command: &Command) -> DictumResult<Vec<TabularBlock>> {
        self.begin(command).await?;
        let name = command.subname.as_deref().unwrap_or_default();
        let handler = self
            .shared
            .query_handlers
            .get(&member_key(&command.entity, name))
            .map(|h| Arc::clone(h.value()));
        match (handler, command.operation) {
            (Some(handler), _) => handler(command),
            (None, Operation::View) => {
                let tables = lock(&self.shared.tables)?;
                let rows = tables
                    .get(&command.entity.to_ascii_lowercase())
                    .map(|t| t.rows.as_slice())
                    .unwrap_or_default();
                Ok(vec![table_block(rows)])
            }
            (None, _) => Err(Self::missing_handler(command)),
        }
    }

    async fn lookup(&mut self, command: &Command) -> DictumResult<Option<Value>> {
        self.begin(command).await?;
        let column = command.description_column.as_deref().ok_or_else(|| StorageError::CommandFailed {
            entity: command.entity.clone(),
            reason: "entity has no description column".to_string(),
        })?;
        Ok(self.find(command)?.and_then(|row| row.get(column).cloned()))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ScopedConnection;
    use serde_json::json;

    fn command(operation: Operation, values: Value) -> Command {
        Command {
            entity: "Customer".to_string(),
            operation,
            subname: None,
            values: serde_json::from_value(values).unwrap(),
            key_columns: vec!["Id".to_string()],
            autonum_column: Some("Id".to_string()),
            description_column: Some("Name".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_generates_autonum_and_update_finds_it() {
        let db = MemoryDatabase::new();
        let mut conn = ScopedConnection::open(&db, "app").await.unwrap();

        let statuses = conn
            .execute(&command(Operation::Insert, json!({"Name": "Acme"})))
            .await
            .unwrap();
        assert_eq!(statuses, vec![DbStatus::autonum("1")]);

        let statuses = conn
            .execute(&command(Operation::Update, json!({"Id": 1, "Name": "Acme Ltd"})))
            .await
            .unwrap();
        assert_eq!(statuses, vec![DbStatus::ok()]);

        let description = conn
            .lookup(&command(Operation::Lookup, json!({"Id": 1})))
            .await
            .unwrap();
        assert_eq!(description, Some(json!("Acme Ltd")));
    }

    #[tokio::test]
    async fn test_update_missing_row_reports_not_found() {
        let db = MemoryDatabase::new();
        let mut conn = ScopedConnection::open(&db, "app").await.unwrap();
        let statuses = conn
            .execute(&command(Operation::Update, json!({"Id": 9})))
            .await
            .unwrap();
        assert_eq!(statuses[0].status_code, dictum_core::codes::RECORD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_scoped_connection_releases_on_drop() {
        let db = MemoryDatabase::new();
        {
            let _conn = ScopedConnection::open(&db, "app").await.unwrap();
            assert_eq!(db.open_connections(), 1);
        }
        assert_eq!(db.opened(), 1);
        assert_eq!(db.released(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_database_refuses_connections() {
        let db = MemoryDatabase::new();
        db.set_unavailable(true);
        assert!(ScopedConnection::open(&db, "app").await.is_err());
        assert!(db.ping().await.is_err());
        assert_eq!(db.opened(), 0);
    }

    #[tokio::test]
    async fn test_interceptor_replaces_write() {
        let db = MemoryDatabase::new();
        db.intercept("customer", |cmd| {
            (cmd.values.get("Name") == Some(&json!("bad"))).then(|| DbStatus::error("rejected"))
        });
        let mut conn = ScopedConnection::open(&db, "app").await.unwrap();
        let statuses = conn
            .execute(&command(Operation::Insert, json!({"Name": "bad"})))
            .await
            .unwrap();
        assert_eq!(statuses, vec![DbStatus::error("rejected")]);
        assert!(db.rows("Customer").is_empty());
    }

    #[tokio::test]
    async fn test_view_without_handler_returns_table() {
        let db = MemoryDatabase::new();
        db.seed("Customer", vec![serde_json::from_value(json!({"Id": 1, "Name": "A"})).unwrap()])
            .unwrap();
        let mut conn = ScopedConnection::open(&db, "app").await.unwrap();
        let mut cmd = command(Operation::View, json!({}));
        cmd.subname = Some("All".to_string());
        let blocks = conn.query(&cmd).await.unwrap();
        assert_eq!(blocks[0].header, vec!["Id".to_string(), "Name".to_string()]);
        assert_eq!(blocks[0].records, vec![vec![json!(1), json!("A")]]);

        cmd.operation = Operation::Proc;
        assert!(conn.query(&cmd).await.is_err());
    }
}
