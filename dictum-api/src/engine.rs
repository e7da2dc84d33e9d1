//! Batch Execution Engine
//!
//! Resolves the target entity, merges each record's values over the column
//! baseline, runs the operation record by record on one scoped connection
//! and aggregates the per-record statuses.
//!
//! Records run in the order supplied. A failing record never stops the
//! batch and never undoes an earlier record; callers inspect the per-record
//! results. Cancellation is observed at every database round trip and
//! yields [`Outcome::Cancelled`]; the connection is released on every exit
//! path by [`ScopedConnection`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dictum_core::{
    codes, merge_record, AggregatedResult, DbStatus, DictumResult, EntityInstance,
    EntityRegistry, ImportSummary, LookupResult, MergeSources, Operation, Outcome,
    RequestEnvelope, TabularBlock, ValidationError, ValueMap,
};
use dictum_storage::{AppKeyStore, Command, ConnectionFactory, ScopedConnection};

// ============================================================================
// EXECUTION CONTEXT
// ============================================================================

/// Per-call context: the application addressed and the cancellation signal.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub app_id: String,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl ExecContext {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Treat the call as cancelled once `timeout` has elapsed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    /// Run `fut` unless cancellation or the deadline comes first.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            _ = deadline => None,
            out = fut => Some(out),
        }
    }
}

/// Await `$fut` under `$ctx`, returning `Ok(Outcome::Cancelled)` from the
/// enclosing function when the call is cancelled first.
macro_rules! or_cancelled {
    ($ctx:expr, $fut:expr) => {
        match $ctx.guard($fut).await {
            Some(out) => out,
            None => {
                tracing::debug!(app_id = %$ctx.app_id, "execution cancelled");
                return Ok(Outcome::Cancelled);
            }
        }
    };
}

// ============================================================================
// ENGINE
// ============================================================================

/// Executes entity operations against scoped connections.
#[derive(Clone)]
pub struct BatchEngine {
    registry: Arc<EntityRegistry>,
    connections: Arc<dyn ConnectionFactory>,
    app_keys: Arc<dyn AppKeyStore>,
}

impl std::fmt::Debug for BatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn first_status(statuses: Vec<DbStatus>) -> DbStatus {
    statuses.into_iter().next().unwrap_or_else(DbStatus::ok)
}

fn failure_message(status: &DbStatus) -> String {
    if status.message.is_empty() {
        format!("status {}", status.status_code)
    } else {
        status.message.clone()
    }
}

/// Merge one record and check the columns the operation requires.
fn prepare(
    instance: &mut EntityInstance,
    operation: Operation,
    sources: MergeSources<'_>,
) -> Result<(), ValidationError> {
    merge_record(instance.columns_mut(), sources)?;
    if matches!(operation, Operation::Insert | Operation::Update) {
        instance.columns().validate_required(operation)?;
    }
    Ok(())
}

/// Store a generated key on the autonumber column.
fn capture_autonum(instance: &mut EntityInstance, statuses: &[DbStatus]) {
    let Some(status) = statuses.iter().find(|s| s.is_autonum()) else {
        return;
    };
    if let Some(column) = instance.columns_mut().autonum_mut() {
        column.current_value = column.logical_type.parse_key(&status.message);
        tracing::trace!(column = %column.name, key = %status.message, "autonumber captured");
    }
}

impl BatchEngine {
    pub fn new(
        registry: Arc<EntityRegistry>,
        connections: Arc<dyn ConnectionFactory>,
        app_keys: Arc<dyn AppKeyStore>,
    ) -> Self {
        Self {
            registry,
            connections,
            app_keys,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<dyn ConnectionFactory> {
        &self.connections
    }

    /// Resolve a fresh instance, or log the configuration fault.
    pub fn resolve(
        &self,
        entity: &str,
        operation: Operation,
        subname: Option<&str>,
    ) -> Option<EntityInstance> {
        let resolved = self.registry.resolve(entity).and_then(|instance| {
            instance
                .definition()
                .check_member(operation, subname)
                .map(|_| instance)
        });
        match resolved {
            Ok(instance) => Some(instance),
            Err(e) => {
                tracing::error!(
                    entity = %entity,
                    operation = %operation,
                    error = %e,
                    "Configuration error, operation not performed"
                );
                None
            }
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Run insert, update, delete, process or action for one record or a
    /// batch.
    ///
    /// Failing to open the connection fails the whole call with `Err` (503
    /// at the route) and produces no per-record statuses.
    pub async fn execute(
        &self,
        ctx: &ExecContext,
        entity: &str,
        operation: Operation,
        subname: Option<&str>,
        envelope: &RequestEnvelope,
    ) -> DictumResult<Outcome<AggregatedResult>> {
        let Some(mut instance) = self.resolve(entity, operation, subname) else {
            return Ok(Outcome::NotPerformed);
        };
        self.execute_on(ctx, &mut instance, operation, subname, envelope)
            .await
    }

    /// Like [`execute`](Self::execute) on a caller-held instance, which keeps
    /// the last record's column state (including a captured autonumber).
    pub async fn execute_on(
        &self,
        ctx: &ExecContext,
        instance: &mut EntityInstance,
        operation: Operation,
        subname: Option<&str>,
        envelope: &RequestEnvelope,
    ) -> DictumResult<Outcome<AggregatedResult>> {
        let entity = instance.name().to_string();
        if !matches!(
            operation,
            Operation::Insert
                | Operation::Update
                | Operation::Delete
                | Operation::Process
                | Operation::Action
        ) {
            tracing::error!(entity = %entity, operation = %operation, "Operation does not return statuses");
            return Ok(Outcome::NotPerformed);
        }
        if let Err(e) = instance.definition().check_member(operation, subname) {
            tracing::error!(entity = %entity, operation = %operation, error = %e, "Configuration error, operation not performed");
            return Ok(Outcome::NotPerformed);
        }

        let app_keys = self.app_keys.keys(&ctx.app_id);
        let policy = instance.definition().policy_for(operation);
        let mut conn = or_cancelled!(ctx, ScopedConnection::open(self.connections.as_ref(), &ctx.app_id))?;

        let records: Vec<Option<&ValueMap>> = if envelope.is_batch() {
            envelope.records_selection.iter().map(Some).collect()
        } else {
            vec![None]
        };

        let mut result = AggregatedResult::new();
        for (record_index, record_keys) in records.into_iter().enumerate() {
            let mut sources = MergeSources::new(&app_keys, &envelope.values, &envelope.parent_keys);
            if let Some(keys) = record_keys {
                sources = sources.with_record(keys);
            }

            let statuses = match prepare(instance, operation, sources) {
                Err(e) => vec![DbStatus::error(e.to_string())],
                Ok(()) => {
                    let command = Command::for_instance(instance, operation, subname);
                    match or_cancelled!(ctx, conn.execute(&command)) {
                        Ok(statuses) => statuses,
                        Err(e) => {
                            tracing::warn!(
                                entity = %entity,
                                operation = %operation,
                                record_index,
                                error = %e,
                                "Record command failed"
                            );
                            vec![DbStatus::error(e.to_string())]
                        }
                    }
                }
            };

            if operation == Operation::Insert {
                capture_autonum(instance, &statuses);
            }
            let statuses = if operation == Operation::Process {
                vec![first_status(statuses)]
            } else {
                statuses
            };
            for status in statuses.iter().filter(|s| policy.is_fatal(s)) {
                tracing::debug!(
                    entity = %entity,
                    record_index,
                    status = status.status_code,
                    message = %status.message,
                    "Record failed"
                );
            }
            result.extend(statuses, &policy);
        }

        tracing::info!(
            entity = %entity,
            operation = %operation,
            app_id = %ctx.app_id,
            records = result.len(),
            failed = result.failed,
            "Operation executed"
        );
        Ok(Outcome::Completed(result))
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Run a view (single record) or procedure (every record, blocks
    /// concatenated).
    pub async fn query(
        &self,
        ctx: &ExecContext,
        entity: &str,
        operation: Operation,
        subname: Option<&str>,
        envelope: &RequestEnvelope,
    ) -> DictumResult<Outcome<Vec<TabularBlock>>> {
        if !matches!(operation, Operation::View | Operation::Proc) {
            tracing::error!(entity = %entity, operation = %operation, "Operation does not return data");
            return Ok(Outcome::NotPerformed);
        }
        let Some(mut instance) = self.resolve(entity, operation, subname) else {
            return Ok(Outcome::NotPerformed);
        };
        let app_keys = self.app_keys.keys(&ctx.app_id);
        let mut conn = or_cancelled!(ctx, ScopedConnection::open(self.connections.as_ref(), &ctx.app_id))?;

        let records: Vec<Option<&ValueMap>> = if operation == Operation::Proc && envelope.is_batch() {
            envelope.records_selection.iter().map(Some).collect()
        } else {
            vec![None]
        };

        let mut blocks = Vec::new();
        for record_keys in records {
            let mut sources = MergeSources::new(&app_keys, &envelope.values, &envelope.parent_keys);
            if let Some(keys) = record_keys {
                sources = sources.with_record(keys);
            }
            merge_record(instance.columns_mut(), sources)?;
            let command = Command::for_instance(&instance, operation, subname);
            blocks.extend(or_cancelled!(ctx, conn.query(&command))?);
        }
        Ok(Outcome::Completed(blocks))
    }

    /// Fetch one record as a flat value map.
    pub async fn get(
        &self,
        ctx: &ExecContext,
        entity: &str,
        envelope: &RequestEnvelope,
    ) -> DictumResult<Outcome<Option<ValueMap>>> {
        let Some(mut instance) = self.resolve(entity, Operation::Get, None) else {
            return Ok(Outcome::NotPerformed);
        };
        let app_keys = self.app_keys.keys(&ctx.app_id);
        merge_record(
            instance.columns_mut(),
            MergeSources::new(&app_keys, &envelope.values, &envelope.parent_keys),
        )?;

        let mut conn = or_cancelled!(ctx, ScopedConnection::open(self.connections.as_ref(), &ctx.app_id))?;
        let command = Command::for_instance(&instance, Operation::Get, None);
        let row = or_cancelled!(ctx, conn.fetch(&command))?;
        Ok(Outcome::Completed(row))
    }

    /// Resolve a record's description.
    pub async fn lookup(
        &self,
        ctx: &ExecContext,
        entity: &str,
        envelope: &RequestEnvelope,
    ) -> DictumResult<Outcome<LookupResult>> {
        let Some(mut instance) = self.resolve(entity, Operation::Lookup, None) else {
            return Ok(Outcome::NotPerformed);
        };
        if instance.definition().description_column.is_none() {
            tracing::error!(entity = %entity, "Lookup on an entity without a description column");
            return Ok(Outcome::NotPerformed);
        }
        let app_keys = self.app_keys.keys(&ctx.app_id);
        merge_record(
            instance.columns_mut(),
            MergeSources::new(&app_keys, &envelope.values, &envelope.parent_keys),
        )?;

        let mut conn = or_cancelled!(ctx, ScopedConnection::open(self.connections.as_ref(), &ctx.app_id))?;
        let command = Command::for_instance(&instance, Operation::Lookup, None);
        let description = or_cancelled!(ctx, conn.lookup(&command))?;
        Ok(Outcome::Completed(LookupResult {
            description: description.unwrap_or(Value::Null),
        }))
    }

    // ========================================================================
    // ROW IMPORT
    // ========================================================================

    /// Import parsed rows into `entity`.
    ///
    /// With `import_proc` every row goes through that procedure; without it
    /// rows are inserted, falling back to update when the record exists.
    /// Row numbers in the summary are 1-based.
    pub async fn import_rows(
        &self,
        ctx: &ExecContext,
        entity: &str,
        import_proc: Option<&str>,
        rows: &[ValueMap],
        parent_keys: &ValueMap,
    ) -> DictumResult<Outcome<ImportSummary>> {
        let Some(mut instance) = self.resolve(entity, Operation::Import, import_proc) else {
            return Ok(Outcome::NotPerformed);
        };
        let app_keys = self.app_keys.keys(&ctx.app_id);
        let mut conn = or_cancelled!(ctx, ScopedConnection::open(self.connections.as_ref(), &ctx.app_id))?;

        let mut summary = ImportSummary::default();
        for (offset, row) in rows.iter().enumerate() {
            let row_index = offset + 1;
            let sources = MergeSources::new(&app_keys, row, parent_keys);
            if let Err(e) = merge_record(instance.columns_mut(), sources) {
                summary.record_error(row_index, e.to_string());
                continue;
            }

            let status = match import_proc {
                Some(name) => {
                    let command = Command::for_instance(&instance, Operation::Import, Some(name));
                    or_cancelled!(ctx, conn.execute(&command)).map(first_status)
                }
                None => {
                    if let Err(e) = instance.columns().validate_required(Operation::Insert) {
                        summary.record_error(row_index, e.to_string());
                        continue;
                    }
                    let insert = Command::for_instance(&instance, Operation::Insert, None);
                    match or_cancelled!(ctx, conn.execute(&insert)).map(first_status) {
                        Ok(status) if status.status_code == codes::RECORD_EXISTS => {
                            let update = Command::for_instance(&instance, Operation::Update, None);
                            or_cancelled!(ctx, conn.execute(&update)).map(first_status)
                        }
                        other => other,
                    }
                }
            };

            match status {
                Ok(status) if !status.is_failure() => summary.record_success(),
                Ok(status) => summary.record_error(row_index, failure_message(&status)),
                Err(e) => summary.record_error(row_index, e.to_string()),
            }
        }

        tracing::info!(
            entity = %entity,
            app_id = %ctx.app_id,
            processed = summary.processed_count,
            errors = summary.error_count,
            "Rows imported"
        );
        Ok(Outcome::Completed(summary))
    }
}
