//! Login flow controller.
//!
//! Drives one login attempt through
//! `Start -> ProviderRedirect -> CallbackPending -> Reconciled -> TokensIssued -> Redirected`,
//! or into `Failed` from any step. The controller holds no per-login state;
//! the signed `state` parameter and the browser's copy of its nonce are the
//! only things carried between requests.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::config::{AuthConfig, RedirectConfig};
use crate::directory::{IdentityDirectory, User};
use crate::federation::{ProviderClient, ProviderProfile, StateCodec};
use crate::reconcile::{AccountReconciler, ReconcileAction};
use crate::token::{IssuedRefreshToken, TokenIssuer};
use crate::{AuthError, AuthResult};

/// Query parameter carrying the refresh token on the success redirect.
pub const REFRESH_TOKEN_PARAM: &str = "refresh_token";

/// States of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowState {
    /// Login requested.
    Start,
    /// Browser sent to the provider.
    ProviderRedirect,
    /// Provider called back; grant not yet exchanged.
    CallbackPending,
    /// Local user resolved.
    Reconciled,
    /// Access and refresh tokens minted and persisted.
    TokensIssued,
    /// Browser sent to the success URL. Terminal.
    Redirected,
    /// Attempt ended without tokens. Terminal.
    Failed,
}

impl FlowState {
    /// Returns `true` for `Redirected` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Redirected | Self::Failed)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::ProviderRedirect => write!(f, "provider_redirect"),
            Self::CallbackPending => write!(f, "callback_pending"),
            Self::Reconciled => write!(f, "reconciled"),
            Self::TokensIssued => write!(f, "tokens_issued"),
            Self::Redirected => write!(f, "redirected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Query parameters of the provider callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,
    /// State issued by [`AuthFlowController::start_login`].
    pub state: Option<String>,
    /// Provider error code, e.g. `access_denied`.
    pub error: Option<String>,
    /// Provider error description.
    pub error_description: Option<String>,
}

/// How a callback ended.
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Tokens were issued; redirect to `location`.
    Success {
        /// Success URL with the refresh token appended.
        location: String,
        /// The signed-in user.
        user_id: Uuid,
    },

    /// The provider step failed; redirect to the failure URL.
    ProviderFailed {
        /// The failure URL.
        location: String,
        /// Why the attempt failed.
        error: AuthError,
    },

    /// A server-side step failed; respond with an error.
    Aborted(AuthError),
}

impl CallbackOutcome {
    /// Terminal state reached by this outcome.
    #[must_use]
    pub fn state(&self) -> FlowState {
        match self {
            Self::Success { .. } => FlowState::Redirected,
            Self::ProviderFailed { .. } | Self::Aborted(_) => FlowState::Failed,
        }
    }

    /// Returns `true` if tokens were issued.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Credentials minted for a reconciled user.
#[derive(Debug)]
pub struct LoginSession {
    /// The signed-in user.
    pub user: User,
    /// What reconciliation did.
    pub action: ReconcileAction,
    /// Signed access token. Never placed in a redirect.
    pub access_token: String,
    /// Persisted refresh token.
    pub refresh_token: IssuedRefreshToken,
}

/// Appends the refresh token to a redirect URL.
///
/// Uses `&` when the URL contains a `?` anywhere, including inside a
/// hash route, and `?` otherwise. The parameter always goes at the very end
/// so a client-side router reading the fragment sees it.
#[must_use]
pub fn append_refresh_token(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    format!("{base}{separator}{REFRESH_TOKEN_PARAM}={encoded}")
}

/// Where to send the browser to start a login.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Provider authorization URL carrying the signed state.
    pub url: Url,
    /// Nonce the browser must present on the callback.
    pub nonce: String,
}

/// Orchestrates the login flow.
pub struct AuthFlowController {
    provider: Arc<dyn ProviderClient>,
    state_codec: StateCodec,
    reconciler: AccountReconciler,
    issuer: TokenIssuer,
    redirects: RedirectConfig,
    secure_cookies: bool,
}

impl AuthFlowController {
    /// Creates a controller from its collaborators.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        state_codec: StateCodec,
        reconciler: AccountReconciler,
        issuer: TokenIssuer,
        redirects: RedirectConfig,
    ) -> Self {
        Self {
            provider,
            state_codec,
            reconciler,
            issuer,
            redirects,
            secure_cookies: false,
        }
    }

    /// Marks the state cookie `Secure`.
    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    /// Wires a controller from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is invalid and
    /// `TokenSigningFailed` if signing keys cannot be built.
    pub fn from_config(
        config: &AuthConfig,
        provider: Arc<dyn ProviderClient>,
        directory: Arc<dyn IdentityDirectory>,
    ) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        Ok(Self::new(
            provider,
            StateCodec::from_config(config)?,
            AccountReconciler::new(directory.clone(), config.tokens.default_role.clone()),
            TokenIssuer::from_config(&config.tokens, directory)?,
            config.redirects.clone(),
        )
        .with_secure_cookies(config.provider.callback_url.starts_with("https://")))
    }

    /// Returns the token issuer.
    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Returns the configured failure URL.
    #[must_use]
    pub fn failure_url(&self) -> &str {
        &self.redirects.failure_url
    }

    /// How long a started login may take to come back.
    #[must_use]
    pub fn state_lifetime(&self) -> Duration {
        self.state_codec.lifetime()
    }

    /// Whether the state cookie is restricted to HTTPS.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    /// Starts a login: issues a state and builds the provider redirect.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be signed or the URL built.
    pub fn start_login(&self) -> AuthResult<LoginRedirect> {
        let state = self.state_codec.issue()?;
        let url = self
            .provider
            .authorization_url(&state.value)
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        tracing::debug!(
            provider = %self.provider.name(),
            state = %FlowState::ProviderRedirect,
            "Redirecting to provider"
        );
        Ok(LoginRedirect {
            url,
            nonce: state.nonce,
        })
    }

    /// Handles the provider callback and decides where the browser goes.
    ///
    /// `browser_nonce` is the nonce the browser kept from [`Self::start_login`];
    /// without a matching one the state is rejected.
    pub async fn handle_callback(
        &self,
        params: CallbackParams,
        browser_nonce: Option<&str>,
    ) -> CallbackOutcome {
        let provider = self.provider.name();
        tracing::debug!(provider = %provider, state = %FlowState::CallbackPending, "Callback received");

        let profile = match self.exchange(params, browser_nonce).await {
            Ok(profile) => profile,
            Err(error) => return self.fail(error),
        };

        match self.complete_login(&profile).await {
            Ok(session) => {
                let location =
                    append_refresh_token(&self.redirects.success_url, &session.refresh_token.token);
                tracing::info!(
                    provider = %provider,
                    user_id = %session.user.id,
                    action = %session.action,
                    state = %FlowState::Redirected,
                    "Login completed"
                );
                CallbackOutcome::Success {
                    location,
                    user_id: session.user.id,
                }
            }
            Err(error) => self.fail(error),
        }
    }

    /// Reconciles a verified profile and mints both tokens.
    ///
    /// The refresh token is persisted last, so a failure at any step leaves
    /// no usable credential behind.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryUnavailable` or `TokenSigningFailed`.
    pub async fn complete_login(&self, profile: &ProviderProfile) -> AuthResult<LoginSession> {
        let provider = self.provider.name();
        let reconciliation = self.reconciler.reconcile(provider, profile).await?;
        tracing::debug!(
            provider = %provider,
            profile_id = %profile.id,
            user_id = %reconciliation.user.id,
            state = %FlowState::Reconciled,
            "Profile reconciled"
        );

        let access_token = self.issuer.issue_access_token(&reconciliation.user)?;
        let refresh_token = self.issuer.issue_refresh_token(&reconciliation.user).await?;
        tracing::debug!(
            user_id = %reconciliation.user.id,
            state = %FlowState::TokensIssued,
            "Tokens issued"
        );

        Ok(LoginSession {
            user: reconciliation.user,
            action: reconciliation.action,
            access_token,
            refresh_token,
        })
    }

    async fn exchange(
        &self,
        params: CallbackParams,
        browser_nonce: Option<&str>,
    ) -> AuthResult<ProviderProfile> {
        let provider = self.provider.name();

        if let Some(error) = params.error {
            let message = match params.error_description.filter(|d| !d.is_empty()) {
                Some(description) => format!("{error}: {description}"),
                None => error,
            };
            return Err(AuthError::provider_exchange_failed(provider, message));
        }

        let state = params
            .state
            .ok_or_else(|| AuthError::invalid_state("missing state parameter"))?;
        self.state_codec.verify(&state, browser_nonce)?;

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                AuthError::provider_exchange_failed(provider, "missing authorization code")
            })?;

        self.provider.exchange_code(&code).await.map_err(|e| {
            if e.is_denied() {
                tracing::info!(provider = %provider, error = %e, "Provider rejected the grant");
            } else if e.is_external_error() {
                tracing::warn!(provider = %provider, error = %e, "Provider exchange failed");
            } else {
                tracing::error!(provider = %provider, error = %e, "Provider response unusable");
            }
            AuthError::provider_exchange_failed(provider, e.to_string())
        })
    }

    fn fail(&self, error: AuthError) -> CallbackOutcome {
        tracing::warn!(
            provider = %self.provider.name(),
            category = %error.category(),
            error = %error,
            state = %FlowState::Failed,
            "Login failed"
        );

        if error.is_client_error() {
            CallbackOutcome::ProviderFailed {
                location: self.redirects.failure_url.clone(),
                error,
            }
        } else {
            CallbackOutcome::Aborted(error)
        }
    }
}

impl fmt::Debug for AuthFlowController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFlowController")
            .field("provider", &self.provider.name())
            .field("redirects", &self.redirects)
            .finish_non_exhaustive()
    }
}
