//! In-memory identity directory.
//!
//! All state lives behind a single lock so a user and its link appear
//! together or not at all.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    DirectoryError, DirectoryResult, ExternalIdentity, IdentityDirectory, RefreshTokenRecord,
    User, UserDraft,
};

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, User>,
    links: HashMap<ExternalIdentity, Uuid>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
}

/// In-memory directory backend.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<State>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users.
    pub async fn user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    /// Number of external identity links.
    pub async fn link_count(&self) -> usize {
        self.state.read().await.links.len()
    }

    /// Number of stored refresh tokens.
    pub async fn refresh_token_count(&self) -> usize {
        self.state.read().await.refresh_tokens.len()
    }

    /// Looks up a stored refresh token by value.
    pub async fn find_refresh_token(&self, token: &str) -> Option<RefreshTokenRecord> {
        self.state.read().await.refresh_tokens.get(token).cloned()
    }

    /// Lists refresh tokens issued to a user.
    pub async fn refresh_tokens_for(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        self.state
            .read()
            .await
            .refresh_tokens
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn find_linked_user(&self, identity: &ExternalIdentity) -> DirectoryResult<Option<User>> {
        let state = self.state.read().await;
        let Some(user_id) = state.links.get(identity) else {
            return Ok(None);
        };

        state.users.get(user_id).cloned().map(Some).ok_or_else(|| {
            DirectoryError::unavailable(format!("link points at missing user {user_id}"))
        })
    }

    async fn create_user_with_link(
        &self,
        draft: &UserDraft,
        identity: &ExternalIdentity,
    ) -> DirectoryResult<User> {
        let mut state = self.state.write().await;

        if state.links.contains_key(identity) {
            return Err(DirectoryError::conflict(format!(
                "identity {}/{} is already linked",
                identity.provider, identity.provider_unique_id
            )));
        }
        if state.users.contains_key(&draft.id) {
            return Err(DirectoryError::conflict(format!(
                "user {} already exists",
                draft.id
            )));
        }

        let user = draft.clone().into_user();
        state.users.insert(user.id, user.clone());
        state.links.insert(identity.clone(), user.id);

        Ok(user)
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> DirectoryResult<()> {
        let mut state = self.state.write().await;

        if !state.users.contains_key(&record.user_id) {
            return Err(DirectoryError::unavailable(format!(
                "refresh token owner {} does not exist",
                record.user_id
            )));
        }
        if state.refresh_tokens.contains_key(&record.token) {
            return Err(DirectoryError::conflict("refresh token already exists"));
        }

        state
            .refresh_tokens
            .insert(record.token.clone(), record.clone());
        Ok(())
    }
}
