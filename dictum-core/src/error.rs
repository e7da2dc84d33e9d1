//! Error types for DICTUM operations

use thiserror::Error;

/// Storage and connection errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection unavailable: {reason}")]
    ConnectionUnavailable { reason: String },

    #[error("Command failed for {entity}: {reason}")]
    CommandFailed { entity: String, reason: String },

    #[error("Malformed result from {entity}: {reason}")]
    MalformedResult { entity: String, reason: String },

    #[error("File storage error: {reason}")]
    File { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown column {column} on entity {entity}")]
    UnknownColumn { entity: String, column: String },
}

/// Configuration errors.
///
/// These describe a mismatch between a request and the entity dictionary.
/// They are logged and surfaced as "not performed", never as transport faults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Entity not registered: {entity}")]
    UnknownEntity { entity: String },

    #[error("{kind} '{name}' is not declared on entity {entity}")]
    UnknownMember {
        entity: String,
        kind: &'static str,
        name: String,
    },

    #[error("Operation {operation} requires a sub-name on entity {entity}")]
    MissingSubname { entity: String, operation: String },
}

/// Import file errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("Import process {file_process_id} has no file reference")]
    MissingFileGuid { file_process_id: String },

    #[error("No stored file for guid {file_guid}")]
    MissingFile { file_guid: String },

    #[error("Extension '{extension}' is not importable")]
    UnsupportedExtension { extension: String },

    #[error("Malformed import file: {reason}")]
    Format { reason: String },

    #[error("Import status cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Master error type for all DICTUM errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DictumError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),
}

/// Result type alias for DICTUM operations.
pub type DictumResult<T> = Result<T, DictumError>;
