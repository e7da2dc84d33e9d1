//! Import process records and their status machine
//!
//! ```text
//! (created) -> Importing -> Completed | Error | FormatError
//!     \-----------------------------> Error
//! ```
//!
//! Once terminal, a record never changes state again.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ImportError;

/// Extensions accepted for import, lowercase.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["csv", "xls", "xlsx"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ImportStatus {
    Importing,
    Completed,
    Error,
    FormatError,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Importing => "Importing",
            ImportStatus::Completed => "Completed",
            ImportStatus::Error => "Error",
            ImportStatus::FormatError => "FormatError",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ImportStatus::Importing)
    }

    /// Whether a record in `from` (None when freshly created) may move to `to`.
    pub fn can_transition(from: Option<ImportStatus>, to: ImportStatus) -> bool {
        match from {
            None => matches!(to, ImportStatus::Importing | ImportStatus::Error),
            Some(ImportStatus::Importing) => to.is_terminal(),
            Some(_) => false,
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a file extension against the allow-list, case-insensitively.
pub fn check_extension(extension: &str) -> Result<String, ImportError> {
    let lower = extension.trim_start_matches('.').to_ascii_lowercase();
    if ALLOWED_EXTENSIONS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(ImportError::UnsupportedExtension {
            extension: extension.to_string(),
        })
    }
}

/// Tracking record of one file import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImportProcessRecord {
    pub file_process_id: String,
    pub target_entity_name: String,
    pub import_proc_name: Option<String>,
    pub file_guid: Option<String>,
    pub status: Option<ImportStatus>,
}

impl ImportProcessRecord {
    pub fn new(
        file_process_id: impl Into<String>,
        target_entity_name: impl Into<String>,
        import_proc_name: Option<String>,
    ) -> Self {
        Self {
            file_process_id: file_process_id.into(),
            target_entity_name: target_entity_name.into(),
            import_proc_name,
            file_guid: None,
            status: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }

    pub fn transition(&mut self, to: ImportStatus) -> Result<(), ImportError> {
        if !ImportStatus::can_transition(self.status, to) {
            return Err(ImportError::InvalidTransition {
                from: self
                    .status
                    .map_or_else(|| "created".to_string(), |s| s.to_string()),
                to: to.to_string(),
            });
        }
        self.status = Some(to);
        Ok(())
    }
}
