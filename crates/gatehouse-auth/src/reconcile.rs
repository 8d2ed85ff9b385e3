//! Account reconciliation for federated sign-in.
//!
//! Maps a verified provider profile to a local [`User`], creating the user
//! and its identity link on first sign-in.
//!
//! # Overview
//!
//! 1. **Find by external identity** - return the linked user if one exists
//! 2. **Create with link** - atomically create the user and its link
//! 3. **Resolve conflicts** - if a concurrent sign-in created the link first,
//!    re-read and return that user
//!
//! Reconciliation never matches users by email; only the
//! `(provider, provider_unique_id)` pair identifies an account.

use std::sync::Arc;

use crate::directory::{ExternalIdentity, IdentityDirectory, User, UserDraft};
use crate::federation::{
    ProviderProfile, best_effort_avatar, best_effort_display_name, best_effort_email,
};
use crate::{AuthError, AuthResult};

/// Result of reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// The resolved user, with roles loaded.
    pub user: User,

    /// The action that was taken.
    pub action: ReconcileAction,
}

/// The action taken during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// The identity was already linked.
    ExistingIdentity,

    /// A new user and link were created.
    Created,

    /// Creation lost a race; the concurrently created user was returned.
    ConflictResolved,
}

impl ReconcileAction {
    /// Returns `true` if a new user was created by this call.
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Returns `true` if an existing user was returned.
    #[must_use]
    pub fn is_existing(&self) -> bool {
        matches!(self, Self::ExistingIdentity | Self::ConflictResolved)
    }
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExistingIdentity => write!(f, "existing_identity"),
            Self::Created => write!(f, "created"),
            Self::ConflictResolved => write!(f, "conflict_resolved"),
        }
    }
}

/// Builds the draft for a first-time sign-in.
#[must_use]
pub fn draft_from_profile(profile: &ProviderProfile, default_role: &str) -> UserDraft {
    UserDraft::new(best_effort_display_name(profile), default_role)
        .with_email(best_effort_email(profile))
        .with_avatar_url(best_effort_avatar(profile))
}

/// Finds or creates the local user for an external identity.
pub struct AccountReconciler {
    directory: Arc<dyn IdentityDirectory>,
    default_role: String,
}

impl AccountReconciler {
    /// Creates a reconciler that assigns `default_role` to new users.
    #[must_use]
    pub fn new(directory: Arc<dyn IdentityDirectory>, default_role: impl Into<String>) -> Self {
        Self {
            directory,
            default_role: default_role.into(),
        }
    }

    /// Resolves the user for a verified profile.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryUnavailable` if any directory call fails.
    pub async fn reconcile(
        &self,
        provider: &str,
        profile: &ProviderProfile,
    ) -> AuthResult<Reconciliation> {
        let identity = ExternalIdentity::new(provider, profile.id.clone());

        if let Some(user) = self.find(&identity).await? {
            tracing::debug!(
                provider = %provider,
                profile_id = %profile.id,
                user_id = %user.id,
                "Existing identity link found"
            );
            return Ok(Reconciliation {
                user,
                action: ReconcileAction::ExistingIdentity,
            });
        }

        let draft = draft_from_profile(profile, &self.default_role);
        match self.directory.create_user_with_link(&draft, &identity).await {
            Ok(user) => {
                tracing::info!(
                    provider = %provider,
                    profile_id = %profile.id,
                    user_id = %user.id,
                    "Created user for new external identity"
                );
                Ok(Reconciliation {
                    user,
                    action: ReconcileAction::Created,
                })
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(
                    provider = %provider,
                    profile_id = %profile.id,
                    "Identity linked concurrently, re-reading"
                );
                let user = self.find(&identity).await?.ok_or_else(|| {
                    AuthError::directory_unavailable(format!(
                        "identity {provider}/{} conflicted but is not linked",
                        profile.id
                    ))
                })?;
                Ok(Reconciliation {
                    user,
                    action: ReconcileAction::ConflictResolved,
                })
            }
            Err(e) => {
                tracing::error!(
                    provider = %provider,
                    profile_id = %profile.id,
                    error = %e,
                    "Failed to create user"
                );
                Err(e.into())
            }
        }
    }

    async fn find(&self, identity: &ExternalIdentity) -> AuthResult<Option<User>> {
        self.directory
            .find_linked_user(identity)
            .await
            .map_err(|e| {
                tracing::error!(
                    provider = %identity.provider,
                    profile_id = %identity.provider_unique_id,
                    error = %e,
                    "Identity lookup failed"
                );
                e.into()
            })
    }
}
