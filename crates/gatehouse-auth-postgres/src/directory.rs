//! PostgreSQL implementation of [`IdentityDirectory`].
//!
//! Uniqueness of external identities is enforced by the
//! `auth_user_providers_identity_key` constraint. A user is created in the
//! same transaction as its first link; if the link insert hits the
//! constraint the transaction is rolled back and a conflict is reported.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use gatehouse_auth::directory::{
    DirectoryResult, ExternalIdentity, IdentityDirectory, RefreshTokenRecord, User, UserDraft,
};

use crate::config::PostgresConfig;
use crate::{PgPool, StorageError, StorageResult, migrations, pool};

type UserTuple = (
    Uuid,
    String,
    String,
    String,
    bool,
    String,
    bool,
    serde_json::Value,
    Vec<String>,
);

fn user_from_tuple(row: UserTuple) -> StorageResult<User> {
    let attributes: HashMap<String, serde_json::Value> = serde_json::from_value(row.7)?;
    Ok(User {
        id: row.0,
        display_name: row.1,
        email: row.2,
        avatar_url: row.3,
        active: row.4,
        default_role: row.5,
        is_anonymous: row.6,
        roles: row.8,
        attributes,
    })
}

/// PostgreSQL identity directory.
#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: Arc<PgPool>,
}

impl PostgresDirectory {
    /// Create a directory with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Connects, and applies migrations if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = pool::create_pool(config).await?;
        if config.run_migrations {
            migrations::run(&pool).await?;
        }
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Find the user linked to an external identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_identity(&self, identity: &ExternalIdentity) -> StorageResult<Option<User>> {
        let row: Option<UserTuple> = query_as(
            r#"
            SELECT u.id, u.display_name, u.email, u.avatar_url, u.active,
                   u.default_role, u.is_anonymous, u.attributes,
                   COALESCE(
                       array_agg(r.role ORDER BY r.role) FILTER (WHERE r.role IS NOT NULL),
                       '{}'::text[]
                   ) AS roles
            FROM auth_user_providers p
            JOIN auth_users u ON u.id = p.user_id
            LEFT JOIN auth_user_roles r ON r.user_id = u.id
            WHERE p.auth_provider = $1
              AND p.auth_provider_unique_id = $2
            GROUP BY u.id
            "#,
        )
        .bind(&identity.provider)
        .bind(&identity.provider_unique_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(user_from_tuple).transpose()
    }

    /// Create a user, its roles and its first link in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the identity is already linked, in which case
    /// nothing is written.
    pub async fn create_with_link(
        &self,
        draft: &UserDraft,
        identity: &ExternalIdentity,
    ) -> StorageResult<User> {
        let mut tx = self.pool.begin().await?;

        query(
            r#"
            INSERT INTO auth_users (id, display_name, email, avatar_url, active, default_role, is_anonymous)
            VALUES ($1, $2, $3, $4, TRUE, $5, FALSE)
            "#,
        )
        .bind(draft.id)
        .bind(&draft.display_name)
        .bind(&draft.email)
        .bind(&draft.avatar_url)
        .bind(&draft.default_role)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx_core::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StorageError::conflict(format!("User '{}' already exists", draft.id));
            }
            StorageError::from(e)
        })?;

        query(
            r#"
            INSERT INTO auth_user_roles (user_id, role)
            SELECT $1, unnest($2::text[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(draft.id)
        .bind(&draft.roles)
        .execute(&mut *tx)
        .await?;

        let linked = query(
            r#"
            INSERT INTO auth_user_providers (id, user_id, auth_provider, auth_provider_unique_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (auth_provider, auth_provider_unique_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(draft.id)
        .bind(&identity.provider)
        .bind(&identity.provider_unique_id)
        .execute(&mut *tx)
        .await?;

        if linked.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::conflict(format!(
                "Identity '{}/{}' is already linked",
                identity.provider, identity.provider_unique_id
            )));
        }

        tx.commit().await?;

        Ok(draft.clone().into_user())
    }

    /// Store a refresh token.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the token value already exists.
    pub async fn insert_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO auth_refresh_tokens (refresh_token, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| {
            if let sqlx_core::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StorageError::conflict("Refresh token already exists");
            }
            StorageError::from(e)
        })?;

        Ok(())
    }

    /// Count refresh tokens issued to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count_tokens_for(&self, user_id: Uuid) -> StorageResult<i64> {
        let (count,): (i64,) =
            query_as("SELECT COUNT(*) FROM auth_refresh_tokens WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(self.pool.as_ref())
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl IdentityDirectory for PostgresDirectory {
    async fn find_linked_user(&self, identity: &ExternalIdentity) -> DirectoryResult<Option<User>> {
        Ok(self.find_by_identity(identity).await?)
    }

    async fn create_user_with_link(
        &self,
        draft: &UserDraft,
        identity: &ExternalIdentity,
    ) -> DirectoryResult<User> {
        Ok(self.create_with_link(draft, identity).await?)
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> DirectoryResult<()> {
        Ok(self
            .insert_token(&record.token, record.user_id, record.expires_at)
            .await?)
    }
}
