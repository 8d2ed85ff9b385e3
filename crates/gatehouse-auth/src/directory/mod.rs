//! Identity directory: users, external identity links and refresh tokens.
//!
//! The directory is the only shared mutable state of the login flow. Backends
//! must enforce uniqueness of `(provider, provider_unique_id)` and create a
//! user together with its first link atomically.
//!
//! # Implementations
//!
//! - [`InMemoryDirectory`] - single-process backend for development and tests
//! - `gatehouse-auth-postgres` - PostgreSQL backend

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::InMemoryDirectory;

// =============================================================================
// Data Model
// =============================================================================

/// A local user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier generated at creation.
    pub id: Uuid,

    /// Display name taken from the provider profile.
    pub display_name: String,

    /// Best-effort email address; empty when the provider supplied none.
    pub email: String,

    /// Best-effort avatar URL; empty when the provider supplied none.
    pub avatar_url: String,

    /// Inactive users keep their links but are otherwise treated normally
    /// by this flow.
    pub active: bool,

    /// Role used when a request does not ask for a specific one.
    pub default_role: String,

    /// Always `false` for provider sign-ins.
    pub is_anonymous: bool,

    /// Assigned roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Extra columns owned by the directory, available to `user_fields`.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl User {
    /// Returns `true` if the user has a specific role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Resolves a named user field for embedding in tokens.
    ///
    /// Built-in fields take precedence over attributes of the same name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "id" => Some(serde_json::Value::String(self.id.to_string())),
            "display_name" => Some(self.display_name.clone().into()),
            "email" => Some(self.email.clone().into()),
            "avatar_url" => Some(self.avatar_url.clone().into()),
            "active" => Some(self.active.into()),
            _ => self.attributes.get(name).cloned(),
        }
    }
}

/// A user that does not exist yet.
///
/// The directory assigns nothing: the id is generated here so a retried
/// create is recognisable in logs.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDraft {
    /// Identifier the user will be created with.
    pub id: Uuid,
    /// Display name.
    pub display_name: String,
    /// Email, possibly empty.
    pub email: String,
    /// Avatar URL, possibly empty.
    pub avatar_url: String,
    /// Default role.
    pub default_role: String,
    /// Roles assigned at creation.
    pub roles: Vec<String>,
}

impl UserDraft {
    /// Creates a draft for a provider sign-in with the given default role.
    #[must_use]
    pub fn new(display_name: impl Into<String>, default_role: impl Into<String>) -> Self {
        let default_role = default_role.into();
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            email: String::new(),
            avatar_url: String::new(),
            roles: vec![default_role.clone()],
            default_role,
        }
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Sets the avatar URL.
    #[must_use]
    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = avatar_url.into();
        self
    }

    /// Materializes the user as the directory stores it.
    /// Provider sign-ins are always active and never anonymous.
    #[must_use]
    pub fn into_user(self) -> User {
        User {
            id: self.id,
            display_name: self.display_name,
            email: self.email,
            avatar_url: self.avatar_url,
            active: true,
            default_role: self.default_role,
            is_anonymous: false,
            roles: self.roles,
            attributes: HashMap::new(),
        }
    }
}

/// Key of an external identity link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Provider name, e.g. "github".
    pub provider: String,
    /// The provider's stable subject id.
    pub provider_unique_id: String,
}

impl ExternalIdentity {
    /// Creates a new identity key.
    #[must_use]
    pub fn new(provider: impl Into<String>, provider_unique_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            provider_unique_id: provider_unique_id.into(),
        }
    }
}

/// A persisted refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Opaque token value.
    pub token: String,
    /// Owning user.
    pub user_id: Uuid,
    /// Absolute expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl RefreshTokenRecord {
    /// Returns `true` if this token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors reported by directory backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backend is unreachable or the query failed.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

impl DirectoryError {
    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<DirectoryError> for crate::AuthError {
    fn from(err: DirectoryError) -> Self {
        crate::AuthError::directory_unavailable(err.to_string())
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

// =============================================================================
// Directory Trait
// =============================================================================

/// Storage operations the login flow depends on.
///
/// Implementations do not retry; transport errors surface as
/// [`DirectoryError::Unavailable`].
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Finds the user linked to an external identity, with roles loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn find_linked_user(&self, identity: &ExternalIdentity) -> DirectoryResult<Option<User>>;

    /// Creates a user and its link in one atomic operation.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Conflict`] if the identity is already
    /// linked; nothing is written in that case.
    async fn create_user_with_link(
        &self,
        draft: &UserDraft,
        identity: &ExternalIdentity,
    ) -> DirectoryResult<User>;

    /// Persists a refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be stored.
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> DirectoryResult<()>;
}
