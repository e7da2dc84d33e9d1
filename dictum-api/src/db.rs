//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling with deadpool-postgres and the connection
//! factory the batch engine runs on.
//!
//! This module does NOT generate SQL for entities. Every command goes through
//! one of four server-side functions, each taking
//! `(entity, operation, subname, values jsonb, metadata jsonb)`:
//!
//! - `dictum_fetch`   -> jsonb object or null
//! - `dictum_execute` -> jsonb array of `{StatusCode, Message}`
//! - `dictum_query`   -> jsonb array of `{Header, typeInfo, records}`
//! - `dictum_lookup`  -> jsonb scalar or null

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tokio_postgres::NoTls;

use dictum_core::{DbStatus, DictumResult, StorageError, TabularBlock, ValueMap};
use dictum_storage::{Command, Connection, ConnectionFactory};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait for a pooled connection at most this long
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "dictum".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("DICTUM_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("DICTUM_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("DICTUM_DB_NAME").unwrap_or_else(|_| "dictum".to_string()),
            user: std::env::var("DICTUM_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("DICTUM_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("DICTUM_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("DICTUM_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// CONNECTION FACTORY
// ============================================================================

/// Hands out pooled PostgreSQL connections, one per engine call.
#[derive(Clone)]
pub struct PgConnectionFactory {
    pool: Pool,
}

impl PgConnectionFactory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> DictumResult<Object> {
        self.pool.get().await.map_err(|e| {
            StorageError::ConnectionUnavailable {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn open(&self, app_id: &str) -> DictumResult<Box<dyn Connection>> {
        let conn = self.get_conn().await?;
        tracing::trace!(app_id = %app_id, "postgres connection checked out");
        Ok(Box::new(PgConnection { conn: Some(conn) }))
    }

    async fn ping(&self) -> DictumResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(|e| {
                StorageError::ConnectionUnavailable {
                    reason: e.to_string(),
                }
                .into()
            })
    }
}

/// One pooled connection. Releasing returns it to the pool.
pub struct PgConnection {
    conn: Option<Object>,
}

fn command_failed(command: &Command, reason: impl std::fmt::Display) -> dictum_core::DictumError {
    StorageError::CommandFailed {
        entity: command.entity.clone(),
        reason: reason.to_string(),
    }
    .into()
}

fn decode<T: DeserializeOwned>(command: &Command, value: JsonValue) -> DictumResult<T> {
    serde_json::from_value(value).map_err(|e| {
        StorageError::MalformedResult {
            entity: command.entity.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

impl PgConnection {
    /// Metadata argument shared by every function call.
    fn metadata(command: &Command) -> JsonValue {
        json!({
            "keys": command.key_columns,
            "autonum": command.autonum_column,
            "description": command.description_column,
        })
    }

    async fn call(&self, function: &str, command: &Command) -> DictumResult<Option<JsonValue>> {
        let conn = self.conn.as_ref().ok_or_else(|| StorageError::ConnectionUnavailable {
            reason: "connection already released".to_string(),
        })?;

        let values = serde_json::to_value(&command.values).map_err(|e| command_failed(command, e))?;
        let metadata = Self::metadata(command);
        let operation = command.operation.as_str();
        let sql = format!("SELECT {}($1, $2, $3, $4, $5)", function);

        let row = conn
            .query_one(
                sql.as_str(),
                &[&command.entity, &operation, &command.subname, &values, &metadata],
            )
            .await
            .map_err(|e| command_failed(command, e))?;
        row.try_get::<_, Option<JsonValue>>(0)
            .map_err(|e| command_failed(command, e))
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn fetch(&mut self, command: &Command) -> DictumResult<Option<ValueMap>> {
        match self.call("dictum_fetch", command).await? {
            None | Some(JsonValue::Null) => Ok(None),
            Some(value) => decode(command, value).map(Some),
        }
    }

    async fn execute(&mut self, command: &Command) -> DictumResult<Vec<DbStatus>> {
        match self.call("dictum_execute", command).await? {
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(value) => decode(command, value),
        }
    }

    async fn query(&mut self, command: &Command) -> DictumResult<Vec<TabularBlock>> {
        match self.call("dictum_query", command).await? {
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(value) => decode(command, value),
        }
    }

    async fn lookup(&mut self, command: &Command) -> DictumResult<Option<JsonValue>> {
        Ok(self
            .call("dictum_lookup", command)
            .await?
            .filter(|value| !value.is_null()))
    }

    fn release(&mut self) {
        self.conn.take();
    }
}
