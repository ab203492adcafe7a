//! Storage backends for collectors, execution history and scores
//!
//! This module provides a trait-based abstraction over the persistence of
//! the engine.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Append-only series**: scores are inserted, never updated
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database
//! - **In-Memory** (fallback): No persistence, for testing or `"backend": "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use dbvitals::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./dbvitals.db").await?;
//!     let collectors = backend.load_collectors().await?;
//!     println!("{} collectors", collectors.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod retention;
#[cfg(feature = "storage-sqlite")]
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{BackendHealth, QueryRange, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
