//! Property-Based Tests for Value Merge Precedence and Column Participation
//!
//! **Property 1: Merge Precedence**
//!
//! For any record, application keys on key columns SHALL survive every
//! caller-supplied source, AND caller values SHALL override the baseline for
//! plain data columns, AND the most specific caller source SHALL win.
//!
//! **Property 2: Flag Participation**
//!
//! For any column and operation, the column SHALL travel with the operation
//! IF AND ONLY IF its flags intersect the operation's required flag.

use dictum_core::{
    merge_record, AggregatedResult, ColumnDescriptor, ColumnFlags, ColumnSet, DbStatus,
    IgnorePolicy, LogicalType, MergeSources, Operation, ValueMap,
};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// FIXTURES
// ============================================================================

fn order_line_columns() -> ColumnSet {
    ColumnSet::new(vec![
        ColumnDescriptor::new("TenantId", LogicalType::Integer, ColumnFlags::PRIMARY_KEY),
        ColumnDescriptor::new("OrderId", LogicalType::Integer, ColumnFlags::FOREIGN_KEY),
        ColumnDescriptor::new("LineNo", LogicalType::Integer, ColumnFlags::PRIMARY_KEY),
        ColumnDescriptor::new("Note", LogicalType::String, ColumnFlags::DATA)
            .with_default(json!("none")),
        ColumnDescriptor::new("Qty", LogicalType::Integer, ColumnFlags::DATA).with_default(json!(0)),
    ])
}

fn single(name: &str, value: Value) -> ValueMap {
    let mut map = ValueMap::new();
    map.insert(name.to_string(), value);
    map
}

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop::sample::select(Operation::ALL.to_vec())
}

fn flags_strategy() -> impl Strategy<Value = ColumnFlags> {
    (0u16..128).prop_map(ColumnFlags::from_bits_truncate)
}

fn status_strategy() -> impl Strategy<Value = DbStatus> {
    prop_oneof![
        Just(DbStatus::ok()),
        (1i64..10_000).prop_map(|k| DbStatus::autonum(k.to_string())),
        "[a-z ]{1,20}".prop_map(DbStatus::error),
        "[a-z ]{1,20}".prop_map(DbStatus::record_changed),
        "[a-z ]{1,20}".prop_map(DbStatus::record_exists),
    ]
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Application key on a PK column is never overridden by any caller source.
    #[test]
    fn prop_app_key_pins_key_columns(
        app_tenant in 1i64..1000,
        caller_tenant in 1i64..1000,
        parent_tenant in proptest::option::of(1i64..1000),
        record_tenant in proptest::option::of(1i64..1000),
    ) {
        let mut columns = order_line_columns();
        let app = single("TenantId", json!(app_tenant));
        let values = single("TenantId", json!(caller_tenant));
        let parent = parent_tenant.map(|t| single("TenantId", json!(t))).unwrap_or_default();
        let record = record_tenant.map(|t| single("TenantId", json!(t))).unwrap_or_default();

        merge_record(&mut columns, MergeSources::new(&app, &values, &parent).with_record(&record))
            .unwrap();

        prop_assert_eq!(columns.value("TenantId"), Some(&json!(app_tenant)));
    }

    /// Caller values override the baseline default of a plain data column.
    #[test]
    fn prop_values_override_data_defaults(qty in -10_000i64..10_000, note in "[a-zA-Z]{1,12}") {
        let mut columns = order_line_columns();
        let mut values = single("Qty", json!(qty));
        values.insert("Note".to_string(), json!(note.clone()));
        let empty = ValueMap::new();

        merge_record(&mut columns, MergeSources::new(&empty, &values, &empty)).unwrap();

        prop_assert_eq!(columns.value("Qty"), Some(&json!(qty)));
        prop_assert_eq!(columns.value("Note"), Some(&json!(note)));
    }

    /// Record keys beat parent keys, which beat values.
    #[test]
    fn prop_most_specific_source_wins(
        from_values in 1i64..100,
        from_parent in proptest::option::of(100i64..200),
        from_record in proptest::option::of(200i64..300),
    ) {
        let mut columns = order_line_columns();
        let empty = ValueMap::new();
        let values = single("OrderId", json!(from_values));
        let parent = from_parent.map(|v| single("OrderId", json!(v))).unwrap_or_default();
        let record = from_record.map(|v| single("OrderId", json!(v))).unwrap_or_default();

        merge_record(&mut columns, MergeSources::new(&empty, &values, &parent).with_record(&record))
            .unwrap();

        let expected = from_record.or(from_parent).unwrap_or(from_values);
        prop_assert_eq!(columns.value("OrderId"), Some(&json!(expected)));
    }

    /// A column omitted from a record always starts from its default.
    #[test]
    fn prop_baseline_reset_between_records(first_qty in 1i64..1000) {
        let mut columns = order_line_columns();
        let empty = ValueMap::new();
        let first = single("Qty", json!(first_qty));
        merge_record(&mut columns, MergeSources::new(&empty, &empty, &empty).with_record(&first))
            .unwrap();
        prop_assert_eq!(columns.value("Qty"), Some(&json!(first_qty)));

        let second = single("LineNo", json!(2));
        merge_record(&mut columns, MergeSources::new(&empty, &empty, &empty).with_record(&second))
            .unwrap();
        prop_assert_eq!(columns.value("Qty"), Some(&json!(0)));
    }

    /// Participation depends only on the flag bitmask.
    #[test]
    fn prop_participation_is_flag_test(flags in flags_strategy(), op in operation_strategy(), value in any::<i64>()) {
        let column = ColumnDescriptor::new("C", LogicalType::Integer, flags).with_default(json!(value));
        let non_null_twin = ColumnDescriptor::new("C", LogicalType::String, flags).not_null();

        let required = op.required_flag();
        let expected = required.is_empty() || flags.intersects(required);
        prop_assert_eq!(column.participates(op), expected);
        prop_assert_eq!(non_null_twin.participates(op), expected);

        let set = ColumnSet::new(vec![column]);
        prop_assert_eq!(set.outbound(op).contains_key("C"), expected);
    }

    /// Failed is the OR of per-record failures; results keep supplied order.
    #[test]
    fn prop_aggregate_failed_is_or(statuses in prop::collection::vec(status_strategy(), 0..20)) {
        let policy = IgnorePolicy::none();
        let agg = AggregatedResult::from_statuses(statuses.clone(), &policy);

        prop_assert_eq!(agg.failed, statuses.iter().any(|s| s.is_failure()));
        prop_assert_eq!(agg.autonum_returned, statuses.iter().any(|s| s.is_autonum()));
        prop_assert_eq!(agg.results, statuses);
    }
}
