//! Connection pool management.

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::Postgres;
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::{PgPool, StorageResult};

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

/// Creates a connection pool from the given configuration.
///
/// # Errors
///
/// Returns an error if the database cannot be reached.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> StorageResult<PgPool> {
    info!(
        pool_size = config.pool_size,
        min_connections = ?config.min_connections,
        connect_timeout = ?config.connect_timeout,
        "Creating PostgreSQL connection pool"
    );

    let min_connections = config
        .min_connections
        .unwrap_or(config.pool_size / 4)
        .max(1);

    let mut options = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections)
        .acquire_timeout(config.connect_timeout);

    if let Some(idle_timeout) = config.idle_timeout {
        options = options.idle_timeout(idle_timeout);
    }

    let pool = options.connect(&config.url).await?;

    debug!("PostgreSQL connection pool created");

    Ok(pool)
}

/// Masks the password in a database URL for logging.
pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@')
        && let Some(colon_pos) = url[..at_pos].rfind(':')
    {
        let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
        if colon_pos > scheme_end {
            return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}
