//! Uploaded file resolution

use async_trait::async_trait;
use dashmap::DashMap;
use dictum_core::{DictumResult, StorageError};
use std::path::{Path, PathBuf};

/// Resolves a stored file's guid to a readable path.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn resolve_path(&self, file_guid: &str) -> DictumResult<Option<PathBuf>>;
}

/// Files stored flat under one directory as `{guid}.{extension}`.
#[derive(Debug, Clone)]
pub struct DirectoryFileStorage {
    root: PathBuf,
}

impl DirectoryFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileStorage for DirectoryFileStorage {
    async fn resolve_path(&self, file_guid: &str) -> DictumResult<Option<PathBuf>> {
        if file_guid.is_empty() || file_guid.contains(['/', '\\']) || file_guid.contains("..") {
            return Ok(None);
        }
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::File {
                    reason: format!("{}: {}", self.root.display(), e),
                }
                .into())
            }
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::File {
            reason: e.to_string(),
        })? {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(file_guid) && path.is_file() {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

/// Explicit guid to path registrations.
#[derive(Debug, Default)]
pub struct InMemoryFileStorage {
    paths: DashMap<String, PathBuf>,
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, file_guid: impl Into<String>, path: impl Into<PathBuf>) {
        self.paths.insert(file_guid.into(), path.into());
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn resolve_path(&self, file_guid: &str) -> DictumResult<Option<PathBuf>> {
        Ok(self.paths.get(file_guid).map(|p| p.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_storage_matches_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc-123.csv"), "Name\nAcme\n").unwrap();
        let storage = DirectoryFileStorage::new(dir.path());

        let found = storage.resolve_path("abc-123").await.unwrap();
        assert_eq!(found, Some(dir.path().join("abc-123.csv")));
        assert_eq!(storage.resolve_path("missing").await.unwrap(), None);
        assert_eq!(storage.resolve_path("../abc-123").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_directory_storage_missing_root_is_none() {
        let storage = DirectoryFileStorage::new("/definitely/not/here");
        assert_eq!(storage.resolve_path("x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryFileStorage::new();
        storage.register("g1", "/tmp/g1.csv");
        assert_eq!(storage.resolve_path("g1").await.unwrap(), Some(PathBuf::from("/tmp/g1.csv")));
        assert_eq!(storage.resolve_path("g2").await.unwrap(), None);
    }
}
