//! PostgreSQL identity directory for Gatehouse Auth
//!
//! Provides persistent storage for:
//!
//! - Users and their roles
//! - External identity links, unique per `(auth_provider, auth_provider_unique_id)`
//! - Refresh tokens
//!
//! The schema ships as embedded migrations, applied on connect when
//! `run_migrations` is enabled.
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_auth_postgres::{PostgresConfig, PostgresDirectory};
//!
//! let directory = PostgresDirectory::connect(&PostgresConfig::new("postgres://localhost/gatehouse")).await?;
//! let user = directory.find_linked_user(&identity).await?;
//! ```

pub mod config;
pub mod directory;
pub mod migrations;
pub mod pool;

use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

use gatehouse_auth::DirectoryError;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use config::PostgresConfig;
pub use directory::PostgresDirectory;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during directory storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Resource already exists (conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A migration failed to apply.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StorageError {
    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if this is a database error.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<StorageError> for DirectoryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => DirectoryError::Conflict(message),
            other => DirectoryError::unavailable(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
