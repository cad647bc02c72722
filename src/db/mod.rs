//! SQLite document store: connection setup, migrations and the
//! repository functions over patients, templates, feedback, snapshots and
//! the job queue.

pub mod sqlite;
pub mod repository;

pub use sqlite::*;
pub use repository::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Database directory unavailable: {0}")]
    Directory(#[source] std::io::Error),

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    /// Optimistic update lost the race: the row's revision moved on.
    #[error("Concurrent update on {entity_type} {id}")]
    RevisionConflict { entity_type: String, id: String },
}
