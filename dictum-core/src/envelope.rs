//! Wire request envelope

use serde::{Deserialize, Serialize};

use crate::value::ValueMap;

/// Body of every entity request.
///
/// A non-empty `records_selection` turns the call into a batch, with `values`
/// acting as a template merged into every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "PascalCase")]
pub struct RequestEnvelope {
    #[serde(default, deserialize_with = "null_as_empty")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub parent_keys: ValueMap,
    #[serde(default, deserialize_with = "null_as_empty")]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub values: ValueMap,
    #[serde(default, deserialize_with = "null_as_empty")]
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<Object>))]
    pub records_selection: Vec<ValueMap>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl RequestEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(mut self, values: ValueMap) -> Self {
        self.values = values;
        self
    }

    pub fn with_parent_keys(mut self, parent_keys: ValueMap) -> Self {
        self.parent_keys = parent_keys;
        self
    }

    pub fn with_records(mut self, records: Vec<ValueMap>) -> Self {
        self.records_selection = records;
        self
    }

    pub fn is_batch(&self) -> bool {
        !self.records_selection.is_empty()
    }
}

/// Body of an import request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "PascalCase")]
pub struct ImportRequest {
    pub file_process_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub parent_keys: ValueMap,
}
