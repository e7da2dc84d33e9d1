//! Column descriptors and participation flags
//!
//! Whether a column travels with an operation is decided only by testing its
//! flag bitmask against the operation's required flag. Nothing else (type,
//! nullability, current value) changes participation.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::operation::Operation;
use crate::value::{LogicalType, ValueMap};

// ============================================================================
// COLUMN FLAGS
// ============================================================================

bitflags! {
    /// Per-column participation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColumnFlags: u16 {
        /// Returned by `get`
        const GET = 1 << 0;
        /// Sent on insert
        const ADD = 1 << 1;
        /// Sent on update
        const EDIT = 1 << 2;
        /// Sent on delete (key selection)
        const DELETE = 1 << 3;
        /// Primary key member
        const PK = 1 << 4;
        /// Foreign key member
        const FK = 1 << 5;
        /// Server-generated on insert
        const AUTONUM = 1 << 6;

        const KEY = Self::PK.bits() | Self::FK.bits();
        const DATA = Self::GET.bits() | Self::ADD.bits() | Self::EDIT.bits();
        const PRIMARY_KEY = Self::DATA.bits() | Self::DELETE.bits() | Self::PK.bits();
        const AUTONUM_KEY = Self::GET.bits()
            | Self::EDIT.bits()
            | Self::DELETE.bits()
            | Self::PK.bits()
            | Self::AUTONUM.bits();
        const FOREIGN_KEY = Self::DATA.bits() | Self::DELETE.bits() | Self::FK.bits();
    }
}

impl Default for ColumnFlags {
    fn default() -> Self {
        Self::empty()
    }
}

// Manual serde implementation for ColumnFlags (bitflags 2.x + serde)
impl Serialize for ColumnFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ColumnFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u16::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid ColumnFlags bits: {:#06x}", bits))
        })
    }
}

// ============================================================================
// COLUMN DESCRIPTOR
// ============================================================================

/// Metadata and current value of one entity column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub logical_type: LogicalType,
    pub flags: ColumnFlags,
    pub nullable: bool,
    pub is_array: bool,
    pub default_value: Value,
    pub current_value: Value,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, logical_type: LogicalType, flags: ColumnFlags) -> Self {
        Self {
            name: name.into(),
            logical_type,
            flags,
            nullable: true,
            is_array: false,
            default_value: Value::Null,
            current_value: Value::Null,
        }
    }

    /// Set the default; the current value starts at the default.
    pub fn with_default(mut self, value: Value) -> Self {
        self.current_value = value.clone();
        self.default_value = value;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn participates(&self, operation: Operation) -> bool {
        let required = operation.required_flag();
        required.is_empty() || self.flags.intersects(required)
    }

    pub fn is_key(&self) -> bool {
        self.flags.intersects(ColumnFlags::KEY)
    }

    pub fn is_autonum(&self) -> bool {
        self.flags.contains(ColumnFlags::AUTONUM)
    }

    pub fn reset(&mut self) {
        self.current_value = self.default_value.clone();
    }

    /// Coerce a value to this column's type, element-wise for array columns.
    pub fn coerce(&self, value: &Value) -> Result<Value, ValidationError> {
        if !self.is_array {
            return self.logical_type.coerce(&self.name, value);
        }
        match value {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => items
                .iter()
                .map(|item| self.logical_type.coerce(&self.name, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            scalar => Ok(Value::Array(vec![self.logical_type.coerce(&self.name, scalar)?])),
        }
    }
}

// ============================================================================
// COLUMN SET
// ============================================================================

/// Ordered set of column descriptors for one entity instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSet {
    columns: Vec<ColumnDescriptor>,
}

impl ColumnSet {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter()
    }

    /// Exact name match first, then ASCII case-insensitive.
    fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.position(name).map(|i| &self.columns[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ColumnDescriptor> {
        self.position(name).map(move |i| &mut self.columns[i])
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|c| &c.current_value)
    }

    /// Set a column's current value. Returns false for unknown columns.
    pub fn set_value(&mut self, name: &str, value: Value) -> bool {
        match self.get_mut(name) {
            Some(column) => {
                column.current_value = value;
                true
            }
            None => false,
        }
    }

    /// Restore every column to its default.
    pub fn reset_to_baseline(&mut self) {
        for column in &mut self.columns {
            column.reset();
        }
    }

    pub fn autonum(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.is_autonum())
    }

    pub fn autonum_mut(&mut self) -> Option<&mut ColumnDescriptor> {
        self.columns.iter_mut().find(|c| c.is_autonum())
    }

    pub fn key_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.flags.contains(ColumnFlags::PK))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Values of the columns participating in `operation`.
    pub fn outbound(&self, operation: Operation) -> ValueMap {
        self.columns
            .iter()
            .filter(|c| c.participates(operation))
            .map(|c| (c.name.clone(), c.current_value.clone()))
            .collect()
    }

    /// Coerce every current value to its column type.
    pub fn coerce_current(&mut self) -> Result<(), ValidationError> {
        for column in &mut self.columns {
            column.current_value = column.coerce(&column.current_value)?;
        }
        Ok(())
    }

    /// Check non-nullable participating columns carry a value.
    ///
    /// Autonumber columns are exempt on insert; the server fills them.
    pub fn validate_required(&self, operation: Operation) -> Result<(), ValidationError> {
        let missing = self.columns.iter().find(|c| {
            !c.nullable
                && c.participates(operation)
                && c.current_value.is_null()
                && !(operation == Operation::Insert && c.is_autonum())
        });
        match missing {
            Some(column) => Err(ValidationError::RequiredFieldMissing {
                field: column.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl FromIterator<ColumnDescriptor> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = ColumnDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
