//! TideSync Store - Local state persistence
//!
//! SQLite-backed storage for:
//! - Canonical file and directory state (what the cloud is believed to hold)
//! - The pending-work queues (local changes not yet acknowledged)
//!
//! ## Key Components
//!
//! - [`SyncStore`] - Typed CRUD plus the composite transactions; owns the
//!   connection pool ([`SyncStore::open`] / [`SyncStore::in_memory`])
//! - [`StoreError`] - Failure kinds for store operations
//!
//! Every mutating operation either commits fully or leaves the store
//! untouched; composite operations run inside a single SQLite
//! transaction, and the canonical `dir_id` reference is enforced by the
//! database so an orphan file row surfaces as a
//! [`StoreError::ConstraintViolation`] instead of persisting.

pub mod store;

pub use store::SyncStore;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A uniqueness or foreign-key constraint was violated
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Schema creation failed
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be mapped back to a domain type
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db)
                if db.is_unique_violation() || db.is_foreign_key_violation() =>
            {
                StoreError::ConstraintViolation(db.to_string())
            }
            _ => StoreError::QueryFailed(e.to_string()),
        }
    }
}
