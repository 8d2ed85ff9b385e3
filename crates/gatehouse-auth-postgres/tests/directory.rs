//! Integration tests against a live PostgreSQL.
//!
//! Run with:
//! `GATEHOUSE_TEST_DATABASE_URL=postgres://... cargo test -p gatehouse-auth-postgres -- --ignored`

use std::collections::HashSet;
use std::sync::Arc;

use gatehouse_auth::{
    AccountReconciler, ExternalIdentity, IdentityDirectory, RefreshTokenRecord, UserDraft,
    federation::ProviderProfile,
};
use gatehouse_auth_postgres::{PostgresConfig, PostgresDirectory};
use time::OffsetDateTime;
use uuid::Uuid;

async fn directory() -> PostgresDirectory {
    let url = std::env::var("GATEHOUSE_TEST_DATABASE_URL")
        .expect("GATEHOUSE_TEST_DATABASE_URL must be set for ignored tests");
    PostgresDirectory::connect(&PostgresConfig::new(url).with_pool_size(8))
        .await
        .expect("connect to test database")
}

/// Each test uses its own provider subject so runs do not interfere.
fn unique_identity() -> ExternalIdentity {
    ExternalIdentity::new("github", Uuid::new_v4().to_string())
}

#[tokio::test]
#[ignore = "requires GATEHOUSE_TEST_DATABASE_URL"]
async fn test_create_and_find_with_roles() {
    let directory = directory().await;
    let identity = unique_identity();

    assert!(directory.find_linked_user(&identity).await.unwrap().is_none());

    let draft = UserDraft::new("Ada", "user").with_email("ada@x.io");
    let created = directory
        .create_user_with_link(&draft, &identity)
        .await
        .unwrap();
    let found = directory
        .find_linked_user(&identity)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.id, created.id);
    assert_eq!(found.email, "ada@x.io");
    assert_eq!(found.avatar_url, "");
    assert!(found.active);
    assert!(!found.is_anonymous);
    assert_eq!(found.roles, vec!["user"]);
}

#[tokio::test]
#[ignore = "requires GATEHOUSE_TEST_DATABASE_URL"]
async fn test_duplicate_link_conflicts_and_rolls_back() {
    let directory = directory().await;
    let identity = unique_identity();

    directory
        .create_user_with_link(&UserDraft::new("Ada", "user"), &identity)
        .await
        .unwrap();

    let loser = UserDraft::new("Ada", "user");
    let err = directory
        .create_user_with_link(&loser, &identity)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let (exists,): (bool,) =
        sqlx_core::query_as::query_as("SELECT EXISTS (SELECT 1 FROM auth_users WHERE id = $1)")
            .bind(loser.id)
            .fetch_one(directory.pool())
            .await
            .unwrap();
    assert!(!exists, "rolled-back user must not be visible");
}

#[tokio::test]
#[ignore = "requires GATEHOUSE_TEST_DATABASE_URL"]
async fn test_concurrent_reconcile_creates_one_user() {
    let directory = Arc::new(directory().await);
    let reconciler = Arc::new(AccountReconciler::new(directory.clone(), "user"));
    let profile = ProviderProfile::new("github", Uuid::new_v4().to_string())
        .with_display_name("Ada");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let reconciler = reconciler.clone();
            let profile = profile.clone();
            tokio::spawn(async move { reconciler.reconcile("github", &profile).await })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap().user.id);
    }
    assert_eq!(ids.len(), 1);

    let (links,): (i64,) = sqlx_core::query_as::query_as(
        "SELECT COUNT(*) FROM auth_user_providers WHERE auth_provider = 'github' AND auth_provider_unique_id = $1",
    )
    .bind(&profile.id)
    .fetch_one(directory.pool())
    .await
    .unwrap();
    assert_eq!(links, 1);
}

#[tokio::test]
#[ignore = "requires GATEHOUSE_TEST_DATABASE_URL"]
async fn test_refresh_tokens_append() {
    let directory = directory().await;
    let user = directory
        .create_user_with_link(&UserDraft::new("Ada", "user"), &unique_identity())
        .await
        .unwrap();

    for i in 0..3 {
        let record = RefreshTokenRecord {
            token: format!("{}-{i}", Uuid::new_v4()),
            user_id: user.id,
            expires_at: OffsetDateTime::now_utc() + time::Duration::minutes(2),
        };
        directory.insert_refresh_token(&record).await.unwrap();
    }

    assert_eq!(directory.count_tokens_for(user.id).await.unwrap(), 3);
}

#[tokio::test]
#[ignore = "requires GATEHOUSE_TEST_DATABASE_URL"]
async fn test_refresh_token_for_unknown_user_fails() {
    let directory = directory().await;
    let record = RefreshTokenRecord {
        token: Uuid::new_v4().to_string(),
        user_id: Uuid::new_v4(),
        expires_at: OffsetDateTime::now_utc(),
    };

    let err = directory.insert_refresh_token(&record).await.unwrap_err();
    assert!(!err.is_conflict());
}
