//! SQLite staging store.
//!
//! The staging relation decouples extraction from querying: the
//! [`BulkLoader`] replaces it and fills it, then the [`Aggregator`] reads
//! it back through the two fixed query shapes.
//!
//! ```text
//! records ──▶ BulkLoader ──▶ important_data ──▶ Aggregator ──▶ basic / advanced rows
//!             (batched tx)    (D.. TEXT,         (streamed)
//!                              M.. INTEGER)
//! ```

pub mod loader;
pub mod query;

pub use loader::{BulkLoader, LoadReport, DEFAULT_BATCH_SIZE};
pub use query::{Aggregator, PreparedQuery, QueryRecords, QueryShape};

use rusqlite::{Connection, OpenFlags};
use std::path::Path;

use crate::error::{SchemaResult, StorageError};
use crate::validation::validate_name;

/// Default name of the staging relation.
pub const DEFAULT_TABLE: &str = "important_data";

/// Open (or create) the staging database file.
pub fn open_store(path: &Path) -> Result<Connection, StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    Connection::open(path).map_err(|source| StorageError::Open {
        path: path.display().to_string(),
        source,
    })
}

/// Open an existing staging database without write access.
pub fn open_store_read_only(path: &Path) -> Result<Connection, StorageError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|source| StorageError::Open {
        path: path.display().to_string(),
        source,
    })
}

/// Quote an identifier for SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Check and quote a table name.
pub(crate) fn checked_table(name: &str) -> SchemaResult<String> {
    validate_name(name)?;
    Ok(quote_ident(name))
}
