//! DICTUM Test Utilities
//!
//! Shared test infrastructure for the DICTUM workspace:
//! - Proptest generators for values, envelopes and statuses
//! - Fixtures: a sample entity dictionary, a seeded in-memory database,
//!   import files on disk
//! - Assertions for aggregated results and outcomes

pub use dictum_storage::{InMemoryAppKeyStore, InMemoryFileStorage, MemoryDatabase};

pub use dictum_core::{
    codes, AccessFlags, AggregatedResult, ColumnDescriptor, ColumnFlags, DbStatus, DictumError,
    DictumResult, EntityDefinition, EntityRegistry, IgnorePolicy, ImportStatus, LogicalType,
    Operation, Outcome, RequestEnvelope, ValueMap,
};

use serde_json::Value;

/// Build a [`ValueMap`] from a JSON object literal.
///
/// Panics when `value` is not an object.
pub fn value_map(value: Value) -> ValueMap {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        other => panic!("value_map expects a JSON object, got {}", other),
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for DICTUM wire types.

    use super::*;
    use proptest::prelude::*;

    /// Column-like identifiers.
    pub fn arb_column_name() -> impl Strategy<Value = String> {
        "[A-Z][a-zA-Z]{0,11}"
    }

    /// Scalar JSON values as they arrive from clients or CSV cells.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ]
    }

    /// A value map over a small, overlapping set of names.
    pub fn arb_value_map(names: &'static [&'static str]) -> impl Strategy<Value = ValueMap> {
        proptest::collection::btree_map(
            proptest::sample::select(names).prop_map(str::to_string),
            arb_scalar(),
            0..names.len() + 1,
        )
    }

    /// Status codes, success and failure.
    pub fn arb_status_code() -> impl Strategy<Value = i32> {
        prop_oneof![
            Just(codes::OK),
            Just(codes::AUTONUM),
            Just(codes::RECORD_EXISTS),
            Just(codes::RECORD_CHANGED),
            Just(codes::RECORD_NOT_FOUND),
            Just(codes::ERROR),
        ]
    }

    pub fn arb_db_status() -> impl Strategy<Value = DbStatus> {
        (arb_status_code(), "[a-z ]{0,12}").prop_map(|(code, message)| DbStatus::new(code, message))
    }

    /// Customer names for batch inserts; distinct within one batch.
    pub fn arb_customer_names(max: usize) -> impl Strategy<Value = Vec<String>> {
        proptest::collection::btree_set("[A-Z][a-z]{2,8}", 1..max + 1)
            .prop_map(|set| set.into_iter().collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures shared by engine, route and import tests.

    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub const APP_ID: &str = "crm";
    pub const TENANT_ID: i64 = 7;
    pub const CUSTOMER: &str = "Customer";
    pub const IMPORT_PROCESS: &str = "ImportProcess";

    /// Customer: autonumbered id, tenant foreign key, required name,
    /// defaulted status. Declares proc `Recalc`, view `Active`, action
    /// `Archive`, import proc `ImportCustomers`. Lookups describe by `Name`.
    /// Inserts tolerate `RECORD_EXISTS`. `get`/`lookup`/`view Active` are
    /// public.
    pub fn customer_definition() -> EntityDefinition {
        EntityDefinition::new(CUSTOMER)
            .column(ColumnDescriptor::new("Id", LogicalType::Integer, ColumnFlags::AUTONUM_KEY))
            .column(
                ColumnDescriptor::new("TenantId", LogicalType::Integer, ColumnFlags::FOREIGN_KEY)
                    .not_null(),
            )
            .column(ColumnDescriptor::new("Name", LogicalType::String, ColumnFlags::DATA).not_null())
            .column(
                ColumnDescriptor::new("Status", LogicalType::String, ColumnFlags::DATA)
                    .with_default(json!("new")),
            )
            .proc("Recalc")
            .proc("ImportCustomers")
            .view("Active")
            .action("Archive")
            .description("Name")
            .insert_policy(IgnorePolicy::ignoring([codes::RECORD_EXISTS]))
            .public(AccessFlags::READ, &["Active"])
    }

    /// Contact: natural string key, child of a customer.
    pub fn contact_definition() -> EntityDefinition {
        EntityDefinition::new("Contact")
            .column(
                ColumnDescriptor::new("Email", LogicalType::String, ColumnFlags::PRIMARY_KEY)
                    .not_null(),
            )
            .column(ColumnDescriptor::new("CustomerId", LogicalType::Integer, ColumnFlags::FOREIGN_KEY))
            .column(ColumnDescriptor::new("FullName", LogicalType::String, ColumnFlags::DATA))
            .column(ColumnDescriptor::new("Since", LogicalType::Date, ColumnFlags::DATA))
    }

    pub fn sample_registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry.register(customer_definition());
        registry.register(contact_definition());
        registry
    }

    /// App keys for [`APP_ID`]: `TenantId = 7`.
    pub fn sample_app_keys() -> InMemoryAppKeyStore {
        InMemoryAppKeyStore::with_keys(APP_ID, value_map(json!({ "TenantId": TENANT_ID })))
    }

    /// Memory database with two customers and handlers for every declared
    /// member of [`customer_definition`].
    pub fn seeded_database() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.seed(
            CUSTOMER,
            vec![
                value_map(json!({"Id": 100, "TenantId": TENANT_ID, "Name": "Acme", "Status": "active"})),
                value_map(json!({"Id": 101, "TenantId": TENANT_ID, "Name": "Globex", "Status": "new"})),
            ],
        )
        .expect("seed customers");

        db.on_query(CUSTOMER, "Recalc", |command| {
            let mut block = dictum_core::TabularBlock::new(
                vec!["Id".to_string(), "Total".to_string()],
                vec![LogicalType::Integer, LogicalType::Decimal],
            );
            block.records = vec![vec![
                command.values.get("Id").cloned().unwrap_or(Value::Null),
                json!(42.5),
            ]];
            Ok(vec![block])
        });
        db.on_execute(CUSTOMER, "Archive", |_| vec![DbStatus::ok()]);
        db.on_execute(CUSTOMER, "ImportCustomers", |command| {
            match command.values.get("Name").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => vec![DbStatus::ok()],
                _ => vec![DbStatus::new(codes::ERROR, "Name is empty")],
            }
        });
        db
    }

    /// Make inserts into the import-process entity behave like the real
    /// table: the row is stored with a server-assigned `FileGuid`.
    pub fn assign_file_guid(db: &MemoryDatabase, file_guid: &str) {
        let table = db.clone();
        let file_guid = file_guid.to_string();
        db.intercept(IMPORT_PROCESS, move |command| {
            if command.operation != Operation::Insert {
                return None;
            }
            let mut row = command.values.clone();
            row.insert("FileGuid".to_string(), Value::from(file_guid.clone()));
            Some(match table.seed(&command.entity, vec![row]) {
                Ok(()) => DbStatus::ok(),
                Err(e) => DbStatus::new(codes::ERROR, e.to_string()),
            })
        });
    }

    /// Write `contents` to a temp file named `{guid}.{extension}` and
    /// register it. The directory must outlive the test.
    pub fn stored_file(
        dir: &tempfile::TempDir,
        files: &InMemoryFileStorage,
        file_guid: &str,
        extension: &str,
        contents: &[u8],
    ) -> std::path::PathBuf {
        let path = dir.path().join(format!("{}.{}", file_guid, extension));
        let mut file = std::fs::File::create(&path).expect("create import file");
        file.write_all(contents).expect("write import file");
        files.register(file_guid, path.clone());
        path
    }

    /// Counts calls; handy for single-flight checks.
    #[derive(Debug, Clone, Default)]
    pub struct CallCounter(Arc<AtomicUsize>);

    impl CallCounter {
        pub fn hit(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst) + 1
        }

        pub fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for DICTUM results.

    use super::*;

    /// Unwrap a completed outcome.
    #[track_caller]
    pub fn assert_completed<T: std::fmt::Debug>(outcome: DictumResult<Outcome<T>>) -> T {
        match outcome {
            Ok(Outcome::Completed(value)) => value,
            other => panic!("Expected Completed, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cancelled<T: std::fmt::Debug>(outcome: &DictumResult<Outcome<T>>) {
        assert!(
            matches!(outcome, Ok(Outcome::Cancelled)),
            "Expected Cancelled, got: {:?}",
            outcome
        );
    }

    /// `Failed` must equal "some status is fatal under `policy`".
    #[track_caller]
    pub fn assert_failed_consistent(result: &AggregatedResult, policy: &IgnorePolicy) {
        let expected = result.results.iter().any(|s| policy.is_fatal(s));
        assert_eq!(
            result.failed, expected,
            "Failed flag {} disagrees with statuses {:?}",
            result.failed, result.results
        );
    }

    #[track_caller]
    pub fn assert_status_codes(result: &AggregatedResult, expected: &[i32]) {
        let codes: Vec<i32> = result.results.iter().map(|s| s.status_code).collect();
        assert_eq!(codes, expected, "Unexpected status codes");
    }
}
