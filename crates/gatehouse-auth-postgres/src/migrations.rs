//! Embedded schema migrations.

use std::borrow::Cow;

use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use tracing::{info, instrument};

use crate::{PgPool, StorageError, StorageResult};

/// `(version, description, sql)` in chronological order.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    20260301000001,
    "identity_directory",
    include_str!("../migrations/20260301000001_identity_directory.sql"),
)];

fn build_migrations() -> Vec<Migration> {
    MIGRATIONS
        .iter()
        .map(|(version, description, sql)| Migration {
            version: *version,
            description: Cow::Borrowed(description),
            migration_type: MigrationType::Simple,
            sql: Cow::Borrowed(sql),
            checksum: Cow::Borrowed(&[]),
            no_tx: false,
        })
        .collect()
}

/// Applies pending migrations. Applied versions are tracked in `_sqlx_migrations`.
///
/// # Errors
///
/// Returns an error if a migration fails to execute.
#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> StorageResult<()> {
    let migrator = Migrator {
        migrations: Cow::Owned(build_migrations()),
        ignore_missing: false,
        locking: true,
        no_tx: false,
    };

    migrator
        .run(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    info!(count = MIGRATIONS.len(), "Identity directory migrations applied");
    Ok(())
}
