//! End-to-end login flow against a mocked GitHub.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_auth::directory::DirectoryResult;
use gatehouse_auth::{
    DirectoryError, ExternalIdentity, IdentityDirectory, InMemoryDirectory, RefreshTokenRecord,
    STATE_COOKIE_NAME, User, UserDraft,
};
use gatehouse_server::{AppConfig, StorageBackend, build_app_with_directory};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUCCESS_URL: &str = "http://app.test/auth/done";
const FAILURE_URL: &str = "http://app.test/auth/failed";

/// What one browser keeps between `/login` and the callback.
struct Browser {
    state: String,
    cookie: String,
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }

    /// Follows `/login` to the provider, keeping the state and its cookie.
    async fn begin_login(&self) -> Browser {
        let resp = self
            .client
            .get(format!("{}/login", self.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::FOUND);

        let cookie = state_cookie(&resp).expect("state cookie");
        let state = Url::parse(location(&resp))
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("state query parameter");
        Browser { state, cookie }
    }

    /// Callback as sent by a browser holding `cookie`.
    async fn callback_with(
        &self,
        cookie: Option<&str>,
        query: &[(&str, &str)],
    ) -> reqwest::Response {
        let mut request = self
            .client
            .get(format!("{}/login/callback", self.base))
            .query(query);
        if let Some(cookie) = cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        request.send().await.unwrap()
    }

    /// Completes the login `browser` started, with the given code.
    async fn finish_login(&self, browser: &Browser, code: &str) -> reqwest::Response {
        self.callback_with(
            Some(&browser.cookie),
            &[("code", code), ("state", &browser.state)],
        )
        .await
    }
}

/// `name=value` of the state cookie set by a response, if any.
fn state_cookie(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{STATE_COOKIE_NAME}=")))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

fn location(resp: &reqwest::Response) -> &str {
    resp.headers()
        .get(reqwest::header::LOCATION)
        .expect("Location header")
        .to_str()
        .unwrap()
}

fn refresh_token_from(location: &str) -> String {
    Url::parse(location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "refresh_token")
        .map(|(_, v)| v.into_owned())
        .expect("refresh_token query parameter")
}

fn test_config(github: &MockServer) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.storage.backend = StorageBackend::Memory;

    let provider = &mut cfg.auth.provider;
    provider.client_id = "client-id".into();
    provider.client_secret = "client-secret".into();
    provider.authorization_url = format!("{}/login/oauth/authorize", github.uri());
    provider.token_url = format!("{}/login/oauth/access_token", github.uri());
    provider.user_profile_url = format!("{}/user", github.uri());
    provider.user_emails_url = Some(format!("{}/user/emails", github.uri()));
    provider.callback_url = "http://localhost/login/callback".into();

    cfg.auth.tokens.signing_secret = "0123456789abcdef0123456789abcdef".into();
    cfg.auth.redirects.success_url = SUCCESS_URL.into();
    cfg.auth.redirects.failure_url = FAILURE_URL.into();
    cfg
}

async fn mock_github() -> MockServer {
    let github = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(body_string_contains("code=good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gho_test",
            "token_type": "bearer",
            "scope": "user:email"
        })))
        .mount(&github)
        .await;

    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(body_string_contains("code=expired"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        })))
        .mount(&github)
        .await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer gho_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 4242,
            "login": "ada",
            "name": "Ada Lovelace",
            "email": "ada@example.com",
            "avatar_url": "https://avatars.example.com/u/4242"
        })))
        .mount(&github)
        .await;

    github
}

async fn start_server(cfg: &AppConfig, directory: Arc<dyn IdentityDirectory>) -> TestServer {
    let app = build_app_with_directory(cfg, directory).expect("build app");

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestServer {
        base: format!("http://{addr}"),
        client,
        shutdown: tx,
        handle,
    }
}

#[tokio::test]
async fn test_healthz() {
    let github = mock_github().await;
    let server = start_server(&test_config(&github), Arc::new(InMemoryDirectory::new())).await;

    let resp = server
        .client
        .get(format!("{}/healthz", server.base))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    server.stop().await;
}

#[tokio::test]
async fn test_login_redirects_to_provider() {
    let github = mock_github().await;
    let server = start_server(&test_config(&github), Arc::new(InMemoryDirectory::new())).await;

    let resp = server
        .client
        .get(format!("{}/login", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    assert_eq!(resp.headers()["cache-control"], "no-store");

    let url = Url::parse(location(&resp)).unwrap();
    assert_eq!(url.path(), "/login/oauth/authorize");
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("client_id".into(), "client-id".into())));
    assert!(pairs.contains(&("scope".into(), "user:email".into())));
    assert!(pairs.iter().any(|(k, v)| k == "state" && !v.is_empty()));

    let set_cookie = resp
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .expect("state cookie")
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with(&format!("{STATE_COOKIE_NAME}=")));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Path=/login"));

    server.stop().await;
}

#[tokio::test]
async fn test_first_login_creates_account_and_persists_refresh_token() {
    let github = mock_github().await;
    let directory = Arc::new(InMemoryDirectory::new());
    let server = start_server(&test_config(&github), directory.clone()).await;

    let browser = server.begin_login().await;
    let resp = server.finish_login(&browser, "good").await;

    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    let cleared = state_cookie(&resp).expect("state cookie cleared");
    assert_eq!(cleared, format!("{STATE_COOKIE_NAME}="));
    let location = location(&resp);
    assert!(location.starts_with(&format!("{SUCCESS_URL}?refresh_token=")));

    let token = refresh_token_from(location);
    let record = directory
        .find_refresh_token(&token)
        .await
        .expect("refresh token persisted");
    assert!(!record.is_expired());

    assert_eq!(directory.user_count().await, 1);
    assert_eq!(directory.link_count().await, 1);
    let user = directory
        .find_linked_user(&ExternalIdentity::new("github", "4242"))
        .await
        .unwrap()
        .expect("linked user");
    assert_eq!(user.id, record.user_id);
    assert_eq!(user.display_name, "Ada Lovelace");
    assert_eq!(user.email, "ada@example.com");
    assert_eq!(user.avatar_url, "https://avatars.example.com/u/4242");

    server.stop().await;
}

#[tokio::test]
async fn test_repeat_logins_reuse_account_with_distinct_tokens() {
    let github = mock_github().await;
    let directory = Arc::new(InMemoryDirectory::new());
    let server = start_server(&test_config(&github), directory.clone()).await;

    let mut tokens = HashSet::new();
    for _ in 0..3 {
        let browser = server.begin_login().await;
        let resp = server.finish_login(&browser, "good").await;
        assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
        tokens.insert(refresh_token_from(location(&resp)));
    }

    assert_eq!(tokens.len(), 3);
    assert_eq!(directory.user_count().await, 1);
    assert_eq!(directory.refresh_token_count().await, 3);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_callbacks_create_one_account() {
    let github = mock_github().await;
    let directory = Arc::new(InMemoryDirectory::new());
    let server = Arc::new(start_server(&test_config(&github), directory.clone()).await);

    // Eight browsers of the same GitHub user finish their logins at once.
    let mut browsers = Vec::new();
    for _ in 0..8 {
        browsers.push(server.begin_login().await);
    }

    let handles: Vec<_> = browsers
        .into_iter()
        .map(|browser| {
            let server = server.clone();
            tokio::spawn(async move {
                let resp = server.finish_login(&browser, "good").await;
                assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
                refresh_token_from(location(&resp))
            })
        })
        .collect();

    let mut tokens = HashSet::new();
    for handle in handles {
        tokens.insert(handle.await.unwrap());
    }

    assert_eq!(tokens.len(), 8);
    assert_eq!(directory.user_count().await, 1);
    assert_eq!(directory.link_count().await, 1);

    if let Ok(server) = Arc::try_unwrap(server) {
        server.stop().await;
    }
}

#[tokio::test]
async fn test_denied_consent_redirects_to_failure_url() {
    let github = mock_github().await;
    let directory = Arc::new(InMemoryDirectory::new());
    let server = start_server(&test_config(&github), directory.clone()).await;
    let browser = server.begin_login().await;

    let resp = server
        .callback_with(
            Some(&browser.cookie),
            &[
                ("error", "access_denied"),
                ("error_description", "The user has denied your application access."),
                ("state", &browser.state),
            ],
        )
        .await;

    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    assert_eq!(location(&resp), FAILURE_URL);
    assert_eq!(directory.user_count().await, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_rejected_code_redirects_to_failure_url() {
    let github = mock_github().await;
    let directory = Arc::new(InMemoryDirectory::new());
    let server = start_server(&test_config(&github), directory.clone()).await;
    let browser = server.begin_login().await;

    let resp = server.finish_login(&browser, "expired").await;

    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    assert_eq!(location(&resp), FAILURE_URL);
    assert_eq!(directory.refresh_token_count().await, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_forged_state_redirects_to_failure_url() {
    let github = mock_github().await;
    let directory = Arc::new(InMemoryDirectory::new());
    let server = start_server(&test_config(&github), directory.clone()).await;

    let browser = server.begin_login().await;

    let resp = server
        .callback_with(
            Some(&browser.cookie),
            &[("code", "good"), ("state", "not-a-real-state")],
        )
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    assert_eq!(location(&resp), FAILURE_URL);

    let resp = server
        .callback_with(Some(&browser.cookie), &[("code", "good")])
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    assert_eq!(location(&resp), FAILURE_URL);

    assert_eq!(directory.user_count().await, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_state_from_another_browser_redirects_to_failure_url() {
    let github = mock_github().await;
    let directory = Arc::new(InMemoryDirectory::new());
    let server = start_server(&test_config(&github), directory.clone()).await;

    // The attacker's state and code end up in a link opened by the victim.
    let attacker = server.begin_login().await;
    let victim = server.begin_login().await;
    let query = [("code", "good"), ("state", attacker.state.as_str())];

    let resp = server.callback_with(Some(&victim.cookie), &query).await;
    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    assert_eq!(location(&resp), FAILURE_URL);

    let resp = server.callback_with(None, &query).await;
    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    assert_eq!(location(&resp), FAILURE_URL);

    assert_eq!(directory.user_count().await, 0);
    assert_eq!(directory.refresh_token_count().await, 0);

    server.stop().await;
}

/// Accounts work, refresh token storage does not.
struct TokenStoreDown {
    inner: InMemoryDirectory,
}

#[async_trait]
impl IdentityDirectory for TokenStoreDown {
    async fn find_linked_user(&self, identity: &ExternalIdentity) -> DirectoryResult<Option<User>> {
        self.inner.find_linked_user(identity).await
    }

    async fn create_user_with_link(
        &self,
        draft: &UserDraft,
        identity: &ExternalIdentity,
    ) -> DirectoryResult<User> {
        self.inner.create_user_with_link(draft, identity).await
    }

    async fn insert_refresh_token(&self, _record: &RefreshTokenRecord) -> DirectoryResult<()> {
        Err(DirectoryError::unavailable("connection reset"))
    }
}

#[tokio::test]
async fn test_token_store_failure_returns_service_unavailable() {
    let github = mock_github().await;
    let directory = Arc::new(TokenStoreDown {
        inner: InMemoryDirectory::new(),
    });
    let server = start_server(&test_config(&github), directory.clone()).await;
    let browser = server.begin_login().await;

    let resp = server.finish_login(&browser, "good").await;

    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert!(resp.headers().get(reqwest::header::LOCATION).is_none());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "temporarily_unavailable");
    assert!(!body["error_description"].as_str().unwrap().contains("connection reset"));
    assert_eq!(directory.inner.refresh_token_count().await, 0);

    server.stop().await;
}
