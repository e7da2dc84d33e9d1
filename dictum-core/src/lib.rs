//! DICTUM Core - Entity Model and Value Merge Engine
//!
//! Pure data types shared by the server and the client: column descriptors,
//! the request envelope, per-record statuses and aggregated results, entity
//! definitions and the entity registry, import process state, and the value
//! merge engine. No I/O lives here.

pub mod column;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod import;
pub mod merge;
pub mod operation;
pub mod outcome;
pub mod status;
pub mod value;

pub use column::{ColumnDescriptor, ColumnFlags, ColumnSet};
pub use entity::{EntityDefinition, EntityInstance, EntityRegistry};
pub use envelope::{ImportRequest, RequestEnvelope};
pub use error::{
    ConfigError, DictumError, DictumResult, ImportError, StorageError, ValidationError,
};
pub use import::{check_extension, ImportProcessRecord, ImportStatus, ALLOWED_EXTENSIONS};
pub use merge::{merge_record, MergeSources};
pub use operation::{AccessFlags, Operation, UnknownOperation};
pub use outcome::Outcome;
pub use status::{
    codes, AggregatedResult, DbStatus, IgnorePolicy, ImportSummary, LookupResult, TabularBlock,
};
pub use value::{date_value, parse_wire_date, LogicalType, ValueMap};
