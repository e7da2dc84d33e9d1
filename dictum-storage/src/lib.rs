//! DICTUM Storage - Collaborator Traits and In-Memory Implementations
//!
//! Defines the seams between the batch engine and the outside world:
//! database connections, uploaded files, and application keys. The
//! PostgreSQL connection factory lives in dictum-api.

pub mod app_keys;
pub mod connection;
pub mod files;
pub mod memory;

pub use app_keys::{AppKeyStore, InMemoryAppKeyStore};
pub use connection::{Command, Connection, ConnectionFactory, ScopedConnection};
pub use files::{DirectoryFileStorage, FileStorage, InMemoryFileStorage};
pub use memory::MemoryDatabase;
