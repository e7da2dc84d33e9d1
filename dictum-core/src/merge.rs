//! Value merge engine
//!
//! Builds the value set of one record from the column baseline and the
//! caller's value sources. Later sources override earlier ones:
//!
//! baseline -> application keys -> values -> parent keys -> record keys
//!
//! A key column (`PK` or `FK`) that received an application key is pinned:
//! no caller-supplied source may change it.

use std::collections::BTreeSet;

use crate::column::ColumnSet;
use crate::error::ValidationError;
use crate::value::ValueMap;

/// The value sources of one record, in precedence order.
#[derive(Debug, Clone, Copy)]
pub struct MergeSources<'a> {
    pub app_keys: &'a ValueMap,
    pub values: &'a ValueMap,
    pub parent_keys: &'a ValueMap,
    pub record_keys: Option<&'a ValueMap>,
}

impl<'a> MergeSources<'a> {
    pub fn new(app_keys: &'a ValueMap, values: &'a ValueMap, parent_keys: &'a ValueMap) -> Self {
        Self {
            app_keys,
            values,
            parent_keys,
            record_keys: None,
        }
    }

    pub fn with_record(mut self, record_keys: &'a ValueMap) -> Self {
        self.record_keys = Some(record_keys);
        self
    }
}

/// Reset `columns` to baseline and apply every source.
///
/// Names that match no column are skipped; application keys are shared
/// across entities and callers routinely send extra fields. Values are
/// coerced to their column types once all sources are applied.
pub fn merge_record(columns: &mut ColumnSet, sources: MergeSources<'_>) -> Result<(), ValidationError> {
    columns.reset_to_baseline();

    let mut pinned = BTreeSet::new();
    for (name, value) in sources.app_keys {
        if let Some(column) = columns.get_mut(name) {
            column.current_value = value.clone();
            if column.is_key() {
                pinned.insert(column.name.clone());
            }
        }
    }

    let caller_sources = [Some(sources.values), Some(sources.parent_keys), sources.record_keys];
    for source in caller_sources.into_iter().flatten() {
        apply(columns, source, &pinned);
    }

    columns.coerce_current()
}

fn apply(columns: &mut ColumnSet, source: &ValueMap, pinned: &BTreeSet<String>) {
    for (name, value) in source {
        match columns.get_mut(name) {
            Some(column) if pinned.contains(&column.name) => {
                tracing::trace!(column = %column.name, "application key pinned, caller value dropped");
            }
            Some(column) => column.current_value = value.clone(),
            None => tracing::trace!(column = %name, "no such column, value dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnDescriptor, ColumnFlags};
    use crate::value::LogicalType;
    use serde_json::{json, Value};

    fn columns() -> ColumnSet {
        ColumnSet::new(vec![
            ColumnDescriptor::new("TenantId", LogicalType::Integer, ColumnFlags::PRIMARY_KEY),
            ColumnDescriptor::new("OrderId", LogicalType::Integer, ColumnFlags::FOREIGN_KEY),
            ColumnDescriptor::new("LineNo", LogicalType::Integer, ColumnFlags::PRIMARY_KEY),
            ColumnDescriptor::new("Region", LogicalType::String, ColumnFlags::DATA),
            ColumnDescriptor::new("Qty", LogicalType::Integer, ColumnFlags::DATA).with_default(json!(1)),
        ])
    }

    fn map(value: Value) -> ValueMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_app_key_on_pk_column_beats_caller_values() {
        let mut set = columns();
        let app = map(json!({"TenantId": 7}));
        let values = map(json!({"TenantId": 99, "Qty": 5}));
        let empty = ValueMap::new();
        merge_record(&mut set, MergeSources::new(&app, &values, &empty)).unwrap();
        assert_eq!(set.value("TenantId"), Some(&json!(7)));
        assert_eq!(set.value("Qty"), Some(&json!(5)));
    }

    #[test]
    fn test_app_key_on_data_column_can_be_overridden() {
        let mut set = columns();
        let app = map(json!({"Region": "EU"}));
        let values = map(json!({"Region": "US"}));
        let empty = ValueMap::new();
        merge_record(&mut set, MergeSources::new(&app, &values, &empty)).unwrap();
        assert_eq!(set.value("Region"), Some(&json!("US")));
    }

    #[test]
    fn test_record_keys_override_parent_keys_and_values() {
        let mut set = columns();
        let empty = ValueMap::new();
        let values = map(json!({"OrderId": 1, "LineNo": 1}));
        let parent = map(json!({"OrderId": 2}));
        let record = map(json!({"LineNo": 3}));
        merge_record(
            &mut set,
            MergeSources::new(&empty, &values, &parent).with_record(&record),
        )
        .unwrap();
        assert_eq!(set.value("OrderId"), Some(&json!(2)));
        assert_eq!(set.value("LineNo"), Some(&json!(3)));
    }

    #[test]
    fn test_merge_resets_to_baseline_first() {
        let mut set = columns();
        set.set_value("Qty", json!(5));
        set.set_value("Region", json!("stale"));
        let empty = ValueMap::new();
        merge_record(&mut set, MergeSources::new(&empty, &empty, &empty)).unwrap();
        assert_eq!(set.value("Qty"), Some(&json!(1)));
        assert_eq!(set.value("Region"), Some(&Value::Null));
    }

    #[test]
    fn test_merge_coerces_and_reports_bad_values() {
        let mut set = columns();
        let empty = ValueMap::new();
        let values = map(json!({"Qty": "12"}));
        merge_record(&mut set, MergeSources::new(&empty, &values, &empty)).unwrap();
        assert_eq!(set.value("Qty"), Some(&json!(12)));

        let bad = map(json!({"Qty": "twelve"}));
        let err = merge_record(&mut set, MergeSources::new(&empty, &bad, &empty)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "Qty"));
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let mut set = columns();
        let app = map(json!({"CompanyCode": "X"}));
        let values = map(json!({"Nope": 1}));
        let empty = ValueMap::new();
        merge_record(&mut set, MergeSources::new(&app, &values, &empty)).unwrap();
        assert!(set.get("Nope").is_none());
    }
}
