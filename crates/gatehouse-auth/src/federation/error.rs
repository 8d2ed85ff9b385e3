//! Error types for identity provider operations.

/// Errors that can occur while talking to an identity provider.
#[derive(Debug, thiserror::Error)]
pub enum IdpError {
    /// Token exchange with the provider failed.
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// The provider returned an unusable user profile.
    #[error("Profile fetch failed: {0}")]
    ProfileFetchFailed(String),

    /// A network error occurred.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Failed to parse a URL.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    /// The provider returned an OAuth error.
    #[error("OAuth error from provider: {error} - {description}")]
    OAuthError {
        /// The OAuth error code.
        error: String,
        /// Optional error description.
        description: String,
    },

    /// A required field is missing from a provider response.
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl IdpError {
    /// Creates an `OAuthError` from a provider response.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuthError {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns `true` if the user or provider refused the grant.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            Self::OAuthError { error, .. }
                if error == "access_denied" || error == "bad_verification_code"
        )
    }

    /// Returns `true` if this is a network or external service error.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExchangeFailed(_)
                | Self::ProfileFetchFailed(_)
                | Self::NetworkError(_)
                | Self::OAuthError { .. }
        )
    }
}
