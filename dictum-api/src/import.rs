//! Import Pipeline
//!
//! Turns an uploaded file into row imports on a target entity while
//! tracking progress on an import-process record:
//!
//! 1. insert the process record (abort on failure, no status written)
//! 2. fetch it back for the server-assigned file guid
//! 3. resolve the guid to a stored file and check its extension
//! 4. `Importing`, parse, import rows
//! 5. `Completed`, or `Error` / `FormatError`
//!
//! Status writes go through the batch engine. A failed status write is
//! logged and does not undo earlier transitions. An import cancelled after
//! entering `Importing` is closed as `Error` outside the cancelled context,
//! so no process record stays in `Importing`.

use std::sync::Arc;

use serde_json::Value;

use dictum_core::{
    check_extension, ColumnDescriptor, ColumnFlags, DictumResult, EntityDefinition, ImportError,
    ImportProcessRecord, ImportRequest, ImportStatus, ImportSummary, LogicalType, Operation,
    Outcome, RequestEnvelope, ValueMap,
};
use dictum_storage::FileStorage;

use crate::engine::{BatchEngine, ExecContext};
use crate::parsers::parse_file_blocking;

pub const FILE_PROCESS_ID: &str = "FileProcessId";
pub const TARGET_ENTITY_NAME: &str = "TargetEntityName";
pub const IMPORT_PROC_NAME: &str = "ImportProcName";
pub const FILE_GUID: &str = "FileGuid";
pub const STATUS: &str = "Status";

/// Entity definition of the import-process tracking table.
///
/// `FileGuid` is assigned server-side; only `Status` is sent on update.
pub fn process_definition(name: &str) -> EntityDefinition {
    let read_add = ColumnFlags::GET | ColumnFlags::ADD;
    EntityDefinition::new(name)
        .column(
            ColumnDescriptor::new(FILE_PROCESS_ID, LogicalType::String, ColumnFlags::PRIMARY_KEY)
                .not_null(),
        )
        .column(ColumnDescriptor::new(TARGET_ENTITY_NAME, LogicalType::String, read_add))
        .column(ColumnDescriptor::new(IMPORT_PROC_NAME, LogicalType::String, read_add))
        .column(ColumnDescriptor::new(FILE_GUID, LogicalType::String, ColumnFlags::GET))
        .column(ColumnDescriptor::new(STATUS, LogicalType::String, ColumnFlags::DATA))
}

/// What one pipeline run did.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub record: ImportProcessRecord,
    /// Every status reached, in order.
    pub transitions: Vec<ImportStatus>,
    /// Present only when the run completed.
    pub summary: Option<ImportSummary>,
}

impl ImportReport {
    pub fn status(&self) -> Option<ImportStatus> {
        self.record.status
    }
}

pub struct ImportPipeline {
    engine: Arc<BatchEngine>,
    files: Arc<dyn FileStorage>,
    process_entity: String,
}

impl ImportPipeline {
    pub fn new(
        engine: Arc<BatchEngine>,
        files: Arc<dyn FileStorage>,
        process_entity: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            files,
            process_entity: process_entity.into(),
        }
    }

    pub fn process_entity(&self) -> &str {
        &self.process_entity
    }

    fn key_values(file_process_id: &str) -> ValueMap {
        ValueMap::from([(FILE_PROCESS_ID.to_string(), Value::from(file_process_id))])
    }

    /// Move the record to `to` and persist the change.
    async fn transition(&self, ctx: &ExecContext, report: &mut ImportReport, to: ImportStatus) {
        let file_process_id = report.record.file_process_id.clone();
        if let Err(e) = report.record.transition(to) {
            tracing::warn!(file_process_id = %file_process_id, error = %e, "Import transition rejected");
            return;
        }
        report.transitions.push(to);
        tracing::info!(file_process_id = %file_process_id, status = %to, "Import status changed");

        let mut values = Self::key_values(&file_process_id);
        values.insert(STATUS.to_string(), Value::from(to.as_str()));
        let envelope = RequestEnvelope::new().with_values(values);
        match self
            .engine
            .execute(ctx, &self.process_entity, Operation::Update, None, &envelope)
            .await
        {
            Ok(Outcome::Completed(result)) if !result.failed => {}
            Ok(Outcome::Completed(result)) => tracing::warn!(
                file_process_id = %file_process_id,
                status = %to,
                results = ?result.results,
                "Import status not persisted"
            ),
            Ok(_) => tracing::debug!(file_process_id = %file_process_id, status = %to, "Import status write skipped"),
            Err(e) => tracing::warn!(
                file_process_id = %file_process_id,
                status = %to,
                error = %e,
                "Import status write failed"
            ),
        }
    }

    async fn fail(
        &self,
        ctx: &ExecContext,
        mut report: ImportReport,
        status: ImportStatus,
        error: &ImportError,
    ) -> DictumResult<Outcome<ImportReport>> {
        tracing::warn!(
            file_process_id = %report.record.file_process_id,
            status = %status,
            error = %error,
            "Import failed"
        );
        self.transition(ctx, &mut report, status).await;
        Ok(Outcome::Completed(report))
    }

    /// Close a cancelled import. The status write runs on a fresh context
    /// because the caller's one is already cancelled.
    async fn abandon(
        &self,
        ctx: &ExecContext,
        mut report: ImportReport,
    ) -> DictumResult<Outcome<ImportReport>> {
        tracing::debug!(file_process_id = %report.record.file_process_id, "Import cancelled");
        let detached = ExecContext::new(ctx.app_id.clone());
        self.transition(&detached, &mut report, ImportStatus::Error).await;
        Ok(Outcome::Cancelled)
    }

    /// Import the file behind `request.file_process_id` into `target_entity`.
    pub async fn run(
        &self,
        ctx: &ExecContext,
        target_entity: &str,
        import_proc: Option<&str>,
        request: &ImportRequest,
    ) -> DictumResult<Outcome<ImportReport>> {
        let file_process_id = request.file_process_id.as_str();
        let mut report = ImportReport {
            record: ImportProcessRecord::new(
                file_process_id,
                target_entity,
                import_proc.map(str::to_string),
            ),
            transitions: Vec::new(),
            summary: None,
        };

        // Create the process record.
        let mut values = Self::key_values(file_process_id);
        values.insert(TARGET_ENTITY_NAME.to_string(), Value::from(target_entity));
        values.insert(
            IMPORT_PROC_NAME.to_string(),
            import_proc.map_or(Value::Null, Value::from),
        );
        let created = self
            .engine
            .execute(
                ctx,
                &self.process_entity,
                Operation::Insert,
                None,
                &RequestEnvelope::new().with_values(values),
            )
            .await?;
        match created {
            Outcome::Completed(result) if !result.failed => {}
            Outcome::Completed(result) => {
                tracing::warn!(
                    file_process_id = %file_process_id,
                    results = ?result.results,
                    "Import process record not created"
                );
                return Ok(Outcome::NotPerformed);
            }
            Outcome::Cancelled => return Ok(Outcome::Cancelled),
            Outcome::NotPerformed => return Ok(Outcome::NotPerformed),
        }

        // Fetch it back for the file guid.
        let key = RequestEnvelope::new().with_values(Self::key_values(file_process_id));
        let fetched = match self.engine.get(ctx, &self.process_entity, &key).await? {
            Outcome::Completed(row) => row,
            Outcome::Cancelled => return Ok(Outcome::Cancelled),
            Outcome::NotPerformed => None,
        };
        report.record.file_guid = fetched
            .as_ref()
            .and_then(|row| row.get(FILE_GUID))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|guid| !guid.is_empty())
            .map(str::to_string);
        let Some(file_guid) = report.record.file_guid.clone() else {
            let error = ImportError::MissingFileGuid {
                file_process_id: file_process_id.to_string(),
            };
            return self.fail(ctx, report, ImportStatus::Error, &error).await;
        };

        // Resolve and vet the stored file.
        let path = match self.files.resolve_path(&file_guid).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                let error = ImportError::MissingFile { file_guid };
                return self.fail(ctx, report, ImportStatus::Error, &error).await;
            }
            Err(e) => {
                tracing::warn!(file_guid = %file_guid, error = %e, "File storage lookup failed");
                let error = ImportError::MissingFile { file_guid };
                return self.fail(ctx, report, ImportStatus::Error, &error).await;
            }
        };
        let raw_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let extension = match check_extension(raw_extension) {
            Ok(extension) => extension,
            Err(error) => return self.fail(ctx, report, ImportStatus::Error, &error).await,
        };

        self.transition(ctx, &mut report, ImportStatus::Importing).await;

        let rows = match ctx.guard(parse_file_blocking(path, extension)).await {
            None => return self.abandon(ctx, report).await,
            Some(Ok(rows)) => rows,
            Some(Err(error)) => return self.fail(ctx, report, ImportStatus::FormatError, &error).await,
        };

        let imported = self
            .engine
            .import_rows(ctx, target_entity, import_proc, &rows, &request.parent_keys)
            .await;
        let summary = match imported {
            Ok(Outcome::Completed(summary)) if summary.processed_count > 0 => summary,
            Ok(Outcome::Cancelled) => return self.abandon(ctx, report).await,
            Ok(_) => {
                let error = ImportError::Format {
                    reason: "import produced no result".to_string(),
                };
                return self.fail(ctx, report, ImportStatus::Error, &error).await;
            }
            Err(e) => {
                tracing::warn!(file_process_id = %file_process_id, error = %e, "Row import failed");
                let error = ImportError::Format {
                    reason: e.to_string(),
                };
                return self.fail(ctx, report, ImportStatus::Error, &error).await;
            }
        };

        self.transition(ctx, &mut report, ImportStatus::Completed).await;
        report.summary = Some(summary);
        Ok(Outcome::Completed(report))
    }
}
