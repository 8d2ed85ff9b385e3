//! GitHub OAuth App client.
//!
//! Implements the authorization-code handshake against GitHub (or GitHub
//! Enterprise) and maps the `/user` response into a [`ProviderProfile`].
//! GitHub does not speak OIDC, so the profile comes from the REST API rather
//! than an ID token.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use url::Url;

use super::error::IdpError;
use super::profile::{ProfileValue, ProviderProfile};
use super::provider::ProviderClient;
use crate::config::ProviderConfig;

/// GitHub provider client.
pub struct GithubProvider {
    name: String,
    client_id: String,
    client_secret: String,
    authorization_url: Url,
    token_url: Url,
    user_profile_url: Url,
    user_emails_url: Option<Url>,
    callback_url: Url,
    scopes: Vec<String>,
    user_agent: String,
    http_client: reqwest::Client,
}

impl GithubProvider {
    /// Creates a client from provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured URL is invalid or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, IdpError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            name: config.normalized_name(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authorization_url: Url::parse(&config.authorization_url)?,
            token_url: Url::parse(&config.token_url)?,
            user_profile_url: Url::parse(&config.user_profile_url)?,
            user_emails_url: config
                .user_emails_url
                .as_deref()
                .map(Url::parse)
                .transpose()?,
            callback_url: Url::parse(&config.callback_url)?,
            scopes: config.scopes.clone(),
            user_agent: config.user_agent.clone(),
            http_client,
        })
    }

    async fn exchange_for_access_token(&self, code: &str) -> Result<String, IdpError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.callback_url.as_str()),
        ];

        tracing::debug!(
            provider = %self.name,
            "Exchanging authorization code with token endpoint: {}",
            self.token_url
        );

        let response = self
            .http_client
            .post(self.token_url.as_str())
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.user_agent)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // GitHub reports grant errors with a 200 status
        if let Ok(token_response) = serde_json::from_str::<TokenResponse>(&body) {
            if let Some(error) = token_response.error {
                return Err(IdpError::oauth_error(
                    error,
                    token_response.error_description.unwrap_or_default(),
                ));
            }
            if status.is_success() {
                return token_response
                    .access_token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| IdpError::MissingField("access_token".to_string()));
            }
        }

        Err(IdpError::TokenExchangeFailed(format!("HTTP {status}")))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<GithubUser, IdpError> {
        let response = self
            .http_client
            .get(self.user_profile_url.as_str())
            .bearer_auth(access_token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IdpError::ProfileFetchFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json::<GithubUser>()
            .await
            .map_err(|e| IdpError::ProfileFetchFailed(format!("Failed to parse user: {e}")))
    }

    /// Verified addresses, primary first. Empty on any failure.
    async fn fetch_verified_emails(&self, access_token: &str) -> Vec<String> {
        let Some(ref url) = self.user_emails_url else {
            return Vec::new();
        };

        let result = async {
            let response = self
                .http_client
                .get(url.as_str())
                .bearer_auth(access_token)
                .header(ACCEPT, "application/vnd.github+json")
                .header(USER_AGENT, &self.user_agent)
                .send()
                .await?
                .error_for_status()?;
            response.json::<Vec<GithubEmail>>().await
        }
        .await;

        match result {
            Ok(mut emails) => {
                emails.retain(|e| e.verified);
                emails.sort_by_key(|e| !e.primary);
                emails.into_iter().map(|e| e.email).collect()
            }
            Err(e) => {
                tracing::warn!(provider = %self.name, error = %e, "Failed to fetch user emails");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ProviderClient for GithubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorization_url(&self, state: &str) -> Result<Url, IdpError> {
        let mut url = self.authorization_url.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", self.callback_url.as_str());
            params.append_pair("scope", &self.scopes.join(" "));
            params.append_pair("state", state);
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderProfile, IdpError> {
        let access_token = self.exchange_for_access_token(code).await?;
        let user = self.fetch_user(&access_token).await?;

        let emails = match user.email.filter(|e| !e.is_empty()) {
            Some(email) => vec![email],
            None => self.fetch_verified_emails(&access_token).await,
        };

        let profile = ProviderProfile {
            id: user.id.to_string(),
            provider: self.name.clone(),
            display_name: user.name,
            username: Some(user.login),
            emails: emails.into_iter().map(ProfileValue::new).collect(),
            photos: user
                .avatar_url
                .filter(|u| !u.is_empty())
                .map(ProfileValue::new)
                .into_iter()
                .collect(),
        };

        tracing::debug!(
            provider = %self.name,
            profile_id = %profile.id,
            "Provider profile fetched"
        );

        Ok(profile)
    }
}

impl std::fmt::Debug for GithubProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubProvider")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("authorization_url", &self.authorization_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Token endpoint response. Success and error share the shape.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}
