//! Neurite store: connection bootstrap and schema.
//!
//! One database holds any number of workspaces. The schema is two tables:
//!
//! - `workspaces`: one row per workspace (uuid key, name, model source and the
//!   auto-tracing / auto-refine flags).
//! - `neurons`: one row per neuron, keyed by `(workspace_uuid, neuron_id)`.
//!   Name and visibility are columns; the annotation graph, root order,
//!   anchored paths, notes and color travel together as a JSON document in
//!   `data`, so one neuron is always written whole.
//!
//! The applied schema version lives in `PRAGMA user_version`. Repositories
//! refuse a connection whose version differs from [`migrations::latest_version`].

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Tables a migrated neurite store must contain.
pub const REQUIRED_TABLES: [&str; 2] = ["workspaces", "neurons"];

/// Schema version recorded on `conn`; 0 for a fresh database.
pub fn schema_version(conn: &rusqlite::Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Failure opening or migrating a neurite store.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The store was written by a newer binary and is left untouched.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "neurite store schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
