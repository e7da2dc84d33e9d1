//! Entity operations and public-access flags

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::column::ColumnFlags;

/// An action addressable on the wire as `/{app_id}/{entity}/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    Insert,
    Update,
    Delete,
    Lookup,
    View,
    Proc,
    Process,
    Action,
    Import,
}

impl Operation {
    pub const ALL: [Operation; 10] = [
        Operation::Get,
        Operation::Insert,
        Operation::Update,
        Operation::Delete,
        Operation::Lookup,
        Operation::View,
        Operation::Proc,
        Operation::Process,
        Operation::Action,
        Operation::Import,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Lookup => "lookup",
            Operation::View => "view",
            Operation::Proc => "proc",
            Operation::Process => "process",
            Operation::Action => "action",
            Operation::Import => "import",
        }
    }

    /// Flag a column must carry to travel with this operation.
    ///
    /// An empty set means every column participates.
    pub fn required_flag(&self) -> ColumnFlags {
        match self {
            Operation::Get => ColumnFlags::GET,
            Operation::Insert => ColumnFlags::ADD,
            Operation::Update => ColumnFlags::EDIT,
            Operation::Delete => ColumnFlags::DELETE,
            Operation::Lookup => ColumnFlags::KEY,
            Operation::View
            | Operation::Proc
            | Operation::Process
            | Operation::Action
            | Operation::Import => ColumnFlags::empty(),
        }
    }

    /// Whether the operation addresses a named member of the entity.
    pub fn requires_subname(&self) -> bool {
        matches!(
            self,
            Operation::View | Operation::Proc | Operation::Process | Operation::Action
        )
    }

    /// Public-access bit guarding this operation.
    pub fn access_flag(&self) -> AccessFlags {
        match self {
            Operation::Get => AccessFlags::GET,
            Operation::Insert => AccessFlags::INSERT,
            Operation::Update => AccessFlags::UPDATE,
            Operation::Delete => AccessFlags::DELETE,
            Operation::Lookup => AccessFlags::LOOKUP,
            Operation::View => AccessFlags::VIEW,
            Operation::Proc => AccessFlags::PROC,
            Operation::Process => AccessFlags::PROCESS,
            Operation::Action => AccessFlags::ACTION,
            Operation::Import => AccessFlags::IMPORT,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown action segment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation '{0}'")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

bitflags! {
    /// Operations an entity exposes on the anonymous `public/` route.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u16 {
        const GET = 1 << 0;
        const INSERT = 1 << 1;
        const UPDATE = 1 << 2;
        const DELETE = 1 << 3;
        const LOOKUP = 1 << 4;
        const VIEW = 1 << 5;
        const PROC = 1 << 6;
        const PROCESS = 1 << 7;
        const ACTION = 1 << 8;
        const IMPORT = 1 << 9;

        const READ = Self::GET.bits() | Self::LOOKUP.bits() | Self::VIEW.bits();
    }
}

impl Default for AccessFlags {
    fn default() -> Self {
        Self::empty()
    }
}

// Manual serde implementation for AccessFlags (bitflags 2.x + serde)
impl Serialize for AccessFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AccessFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u16::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid AccessFlags bits: {:#06x}", bits))
        })
    }
}
