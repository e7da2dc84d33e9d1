//! Per-record statuses and aggregated operation results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::value::{LogicalType, ValueMap};

/// Reserved status codes returned by the database per record.
pub mod codes {
    pub const OK: i32 = 0;
    pub const RECORD_EXISTS: i32 = 3;
    pub const RECORD_CHANGED: i32 = 4;
    pub const RECORD_NOT_FOUND: i32 = 5;
    pub const ERROR: i32 = 11;
    pub const AUTONUM: i32 = 15;
}

/// Outcome of one database command for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "PascalCase")]
pub struct DbStatus {
    pub status_code: i32,
    #[serde(default)]
    pub message: String,
}

impl DbStatus {
    pub fn new(status_code: i32, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(codes::OK, "")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(codes::ERROR, message)
    }

    pub fn autonum(key: impl Into<String>) -> Self {
        Self::new(codes::AUTONUM, key)
    }

    pub fn record_exists(message: impl Into<String>) -> Self {
        Self::new(codes::RECORD_EXISTS, message)
    }

    pub fn record_changed(message: impl Into<String>) -> Self {
        Self::new(codes::RECORD_CHANGED, message)
    }

    pub fn is_autonum(&self) -> bool {
        self.status_code == codes::AUTONUM
    }

    /// `OK` and `AUTONUM` are the only success codes.
    pub fn is_failure(&self) -> bool {
        self.status_code != codes::OK && self.status_code != codes::AUTONUM
    }
}

/// Status codes an operation treats as non-fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnorePolicy {
    codes: BTreeSet<i32>,
}

impl IgnorePolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn ignoring(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    pub fn ignores(&self, code: i32) -> bool {
        self.codes.contains(&code)
    }

    pub fn is_fatal(&self, status: &DbStatus) -> bool {
        status.is_failure() && !self.ignores(status.status_code)
    }
}

/// Combined outcome of a single or batched write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "PascalCase")]
pub struct AggregatedResult {
    pub failed: bool,
    pub autonum_returned: bool,
    pub results: Vec<DbStatus>,
}

impl AggregatedResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, status: DbStatus, policy: &IgnorePolicy) {
        self.failed |= policy.is_fatal(&status);
        self.autonum_returned |= status.is_autonum();
        self.results.push(status);
    }

    pub fn extend(&mut self, statuses: impl IntoIterator<Item = DbStatus>, policy: &IgnorePolicy) {
        for status in statuses {
            self.push(status, policy);
        }
    }

    pub fn from_statuses(statuses: impl IntoIterator<Item = DbStatus>, policy: &IgnorePolicy) -> Self {
        let mut result = Self::new();
        result.extend(statuses, policy);
        result
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Message of the first fatal entry, if any.
    pub fn first_failure(&self, policy: &IgnorePolicy) -> Option<&DbStatus> {
        self.results.iter().find(|s| policy.is_fatal(s))
    }
}

/// One result set returned by a view or procedure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TabularBlock {
    #[serde(rename = "Header")]
    pub header: Vec<String>,
    #[serde(rename = "typeInfo")]
    pub type_info: Vec<LogicalType>,
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<Vec<Object>>))]
    pub records: Vec<Vec<Value>>,
}

impl TabularBlock {
    pub fn new(header: Vec<String>, type_info: Vec<LogicalType>) -> Self {
        Self {
            header,
            type_info,
            records: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.records.push(row);
        self
    }

    /// Row `index` as a column-name keyed map.
    pub fn row_map(&self, index: usize) -> Option<ValueMap> {
        self.records.get(index).map(|row| {
            self.header
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
    }
}

/// Answer to a `lookup`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "PascalCase")]
pub struct LookupResult {
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub description: Value,
}

/// Summary of a row import. `errors` is keyed by 1-based data-row index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "PascalCase")]
pub struct ImportSummary {
    pub processed_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: BTreeMap<usize, String>,
}

impl ImportSummary {
    pub fn record_success(&mut self) {
        self.processed_count += 1;
        self.success_count += 1;
    }

    pub fn record_error(&mut self, row_index: usize, message: impl Into<String>) {
        self.processed_count += 1;
        self.error_count += 1;
        self.errors.insert(row_index, message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_autonum_is_success() {
        assert!(!DbStatus::autonum("42").is_failure());
        assert!(!DbStatus::ok().is_failure());
        assert!(DbStatus::record_changed("stale").is_failure());
    }

    #[test]
    fn test_aggregate_failed_is_or_of_records() {
        let policy = IgnorePolicy::none();
        let agg = AggregatedResult::from_statuses(
            vec![DbStatus::ok(), DbStatus::error("boom"), DbStatus::ok()],
            &policy,
        );
        assert!(agg.failed);
        assert_eq!(agg.len(), 3);
        assert_eq!(agg.first_failure(&policy).map(|s| s.message.as_str()), Some("boom"));
    }

    #[test]
    fn test_ignore_policy_suppresses_failed() {
        let policy = IgnorePolicy::ignoring([codes::RECORD_EXISTS]);
        let agg = AggregatedResult::from_statuses(vec![DbStatus::record_exists("dup")], &policy);
        assert!(!agg.failed);
        assert_eq!(agg.results[0].status_code, codes::RECORD_EXISTS);
    }

    #[test]
    fn test_aggregate_wire_shape() {
        let agg = AggregatedResult::from_statuses(vec![DbStatus::autonum("7")], &IgnorePolicy::none());
        assert_eq!(
            serde_json::to_value(&agg).unwrap(),
            json!({
                "Failed": false,
                "AutonumReturned": true,
                "Results": [{"StatusCode": 15, "Message": "7"}]
            })
        );
    }

    #[test]
    fn test_tabular_block_wire_shape_and_row_map() {
        let block = TabularBlock::new(vec!["Id".into(), "Name".into()], vec![LogicalType::Integer, LogicalType::String])
            .with_row(vec![json!(1), json!("Acme")]);
        let json = serde_json::to_value(&block).unwrap();
        assert!(json.get("Header").is_some());
        assert!(json.get("typeInfo").is_some());
        assert_eq!(block.row_map(0).unwrap().get("Name"), Some(&json!("Acme")));
        assert!(block.row_map(1).is_none());
    }

    #[test]
    fn test_import_summary_counts() {
        let mut summary = ImportSummary::default();
        summary.record_success();
        summary.record_error(2, "bad qty");
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["ProcessedCount"], json!(2));
        assert_eq!(json["Errors"]["2"], json!("bad qty"));
    }
}
