//! Authentication configuration.
//!
//! This module provides the configuration types for the login flow: the
//! OAuth provider registration, token signing and lifetimes, and the
//! redirect targets handed back to the client application.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::token::RESERVED_CLAIMS;

/// Minimum accepted length (in bytes) of the token signing secret.
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Upper bound for every configured lifetime (one year).
pub const MAX_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Root authentication configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [auth.provider]
/// name = "github"
/// client_id = "Iv1.0123456789abcdef"
/// client_secret = "..."
/// callback_url = "https://auth.example.com/login/callback"
///
/// [auth.tokens]
/// signing_secret = "a-long-random-string-of-at-least-32-bytes"
/// access_token_lifetime = "15m"
/// refresh_token_lifetime = "2m"
/// user_fields = ["display_name", "email"]
///
/// [auth.redirects]
/// success_url = "https://app.example.com/auth/done"
/// failure_url = "https://app.example.com/auth/failed"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OAuth provider registration.
    pub provider: ProviderConfig,

    /// Token signing and lifetimes.
    pub tokens: TokenConfig,

    /// Where the browser is sent once the flow terminates.
    pub redirects: RedirectConfig,

    /// How long an issued OAuth `state` parameter stays valid.
    #[serde(with = "humantime_serde")]
    pub state_lifetime: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            tokens: TokenConfig::default(),
            redirects: RedirectConfig::default(),
            state_lifetime: Duration::from_secs(600), // 10 minutes
        }
    }
}

/// OAuth provider registration.
///
/// Endpoint defaults point at GitHub; override them for GitHub Enterprise
/// or for tests.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name recorded on external identity links (e.g. "github").
    pub name: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: String,

    /// Authorization endpoint the browser is redirected to.
    pub authorization_url: String,

    /// Token endpoint used for the code exchange.
    pub token_url: String,

    /// Endpoint returning the authenticated user's profile.
    pub user_profile_url: String,

    /// Endpoint listing the user's email addresses.
    /// Consulted only when the profile carries no public email.
    pub user_emails_url: Option<String>,

    /// Callback URL registered with the provider.
    pub callback_url: String,

    /// Requested scopes. Must grant access to the user's email.
    pub scopes: Vec<String>,

    /// Timeout for each request made to the provider.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// User-Agent sent to the provider API.
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "github".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            authorization_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            user_profile_url: "https://api.github.com/user".to_string(),
            user_emails_url: Some("https://api.github.com/user/emails".to_string()),
            callback_url: "http://localhost:8080/login/callback".to_string(),
            scopes: vec!["user:email".to_string()],
            request_timeout: Duration::from_secs(10),
            user_agent: concat!("gatehouse/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("authorization_url", &self.authorization_url)
            .field("token_url", &self.token_url)
            .field("user_profile_url", &self.user_profile_url)
            .field("user_emails_url", &self.user_emails_url)
            .field("callback_url", &self.callback_url)
            .field("scopes", &self.scopes)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Token signing configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HMAC signing algorithm: "HS256", "HS384" or "HS512".
    pub signing_algorithm: String,

    /// Shared signing secret. Also signs the OAuth state parameter.
    pub signing_secret: String,

    /// Optional `iss` claim.
    pub issuer: Option<String>,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    /// Kept short: the client is expected to exchange it immediately.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// When set, Hasura-style `x-hasura-*` claims are nested under this key.
    pub claims_namespace: Option<String>,

    /// Additional user fields embedded in access tokens.
    pub user_fields: Vec<String>,

    /// Role given to users created on first sign-in.
    pub default_role: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_algorithm: "HS256".to_string(),
            signing_secret: String::new(),
            issuer: None,
            access_token_lifetime: Duration::from_secs(15 * 60), // 15 minutes
            refresh_token_lifetime: Duration::from_secs(2 * 60), // 2 minutes
            claims_namespace: None,
            user_fields: Vec::new(),
            default_role: "user".to_string(),
        }
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("signing_algorithm", &self.signing_algorithm)
            .field("signing_secret", &"[redacted]")
            .field("issuer", &self.issuer)
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("refresh_token_lifetime", &self.refresh_token_lifetime)
            .field("claims_namespace", &self.claims_namespace)
            .field("user_fields", &self.user_fields)
            .field("default_role", &self.default_role)
            .finish()
    }
}

/// Client redirect targets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Success URL; `refresh_token` is appended as a query parameter.
    pub success_url: String,

    /// Failure URL for denied consent and failed exchanges.
    pub failure_url: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            success_url: "http://localhost:3000/".to_string(),
            failure_url: "http://localhost:3000/login-failed".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for an absent client id, client secret
    /// or signing secret, and `ConfigError::InvalidValue` for unparsable
    /// URLs, unsupported algorithms, a short signing secret, zero lifetimes
    /// and user fields that collide with reserved claims.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let provider = &self.provider;
        if provider.name.trim().is_empty() {
            return Err(ConfigError::Missing("auth.provider.name".to_string()));
        }
        if provider.client_id.is_empty() {
            return Err(ConfigError::Missing("auth.provider.client_id".to_string()));
        }
        if provider.client_secret.is_empty() {
            return Err(ConfigError::Missing(
                "auth.provider.client_secret".to_string(),
            ));
        }
        if provider.scopes.is_empty() {
            return Err(ConfigError::InvalidValue(
                "auth.provider.scopes must not be empty".to_string(),
            ));
        }

        validate_url("auth.provider.authorization_url", &provider.authorization_url)?;
        validate_url("auth.provider.token_url", &provider.token_url)?;
        validate_url("auth.provider.user_profile_url", &provider.user_profile_url)?;
        if let Some(ref emails_url) = provider.user_emails_url {
            validate_url("auth.provider.user_emails_url", emails_url)?;
        }
        validate_url("auth.provider.callback_url", &provider.callback_url)?;
        validate_url("auth.redirects.success_url", &self.redirects.success_url)?;
        validate_url("auth.redirects.failure_url", &self.redirects.failure_url)?;

        let tokens = &self.tokens;
        match tokens.signing_algorithm.as_str() {
            "HS256" | "HS384" | "HS512" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signing algorithm: '{}'. Must be HS256, HS384, or HS512",
                    other
                )));
            }
        }
        if tokens.signing_secret.is_empty() {
            return Err(ConfigError::Missing(
                "auth.tokens.signing_secret".to_string(),
            ));
        }
        if tokens.signing_secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(ConfigError::InvalidValue(format!(
                "auth.tokens.signing_secret must be at least {} bytes",
                MIN_SIGNING_SECRET_LEN
            )));
        }
        validate_lifetime(
            "auth.tokens.access_token_lifetime",
            tokens.access_token_lifetime,
        )?;
        validate_lifetime(
            "auth.tokens.refresh_token_lifetime",
            tokens.refresh_token_lifetime,
        )?;
        if tokens.default_role.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "auth.tokens.default_role must not be empty".to_string(),
            ));
        }
        for field in &tokens.user_fields {
            if RESERVED_CLAIMS.contains(&field.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "auth.tokens.user_fields: '{}' collides with a reserved claim",
                    field
                )));
            }
        }
        if tokens
            .claims_namespace
            .as_deref()
            .is_some_and(|ns| ns.trim().is_empty())
        {
            return Err(ConfigError::InvalidValue(
                "auth.tokens.claims_namespace must not be blank".to_string(),
            ));
        }

        validate_lifetime("auth.state_lifetime", self.state_lifetime)
    }

    /// Returns the provider name as recorded on identity links.
    #[must_use]
    pub fn provider_name(&self) -> String {
        self.provider.normalized_name()
    }
}

impl ProviderConfig {
    /// Trimmed, lowercase provider name.
    #[must_use]
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_ascii_lowercase()
    }
}

fn validate_lifetime(key: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue(format!("{key} must be > 0")));
    }
    if value > MAX_LIFETIME {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must not exceed {}s",
            MAX_LIFETIME.as_secs()
        )));
    }
    Ok(())
}

fn validate_url(key: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidValue(format!("{key}: {e}")))
}
