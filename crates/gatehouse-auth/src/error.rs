//! Authentication error types.
//!
//! This module defines the error taxonomy of the login flow. Every failure
//! ends the login attempt; no error is ever turned into a partial success.

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Errors that can occur while signing a user in.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The provider rejected the grant, the user denied consent, or the
    /// provider could not be reached during the code exchange.
    #[error("Provider exchange failed: {provider} - {message}")]
    ProviderExchangeFailed {
        /// The provider name.
        provider: String,
        /// Description of the failure.
        message: String,
    },

    /// The OAuth state parameter is missing, forged or expired.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of why the state was rejected.
        message: String,
    },

    /// The identity directory is unreachable or a query failed.
    #[error("Directory unavailable: {message}")]
    DirectoryUnavailable {
        /// Description of the directory error.
        message: String,
    },

    /// An access token could not be signed.
    #[error("Token signing failed: {message}")]
    TokenSigningFailed {
        /// Description of the signing error.
        message: String,
    },

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `ProviderExchangeFailed` error.
    #[must_use]
    pub fn provider_exchange_failed(
        provider: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ProviderExchangeFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidState` error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a new `DirectoryUnavailable` error.
    #[must_use]
    pub fn directory_unavailable(message: impl Into<String>) -> Self {
        Self::DirectoryUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `TokenSigningFailed` error.
    #[must_use]
    pub fn token_signing_failed(message: impl Into<String>) -> Self {
        Self::TokenSigningFailed {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if the user should land on the failure redirect
    /// rather than receive an error response.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ProviderExchangeFailed { .. } | Self::InvalidState { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::DirectoryUnavailable { .. }
                | Self::TokenSigningFailed { .. }
                | Self::Configuration { .. }
        )
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ProviderExchangeFailed { .. } => ErrorCategory::Federation,
            Self::InvalidState { .. } => ErrorCategory::Validation,
            Self::DirectoryUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::TokenSigningFailed { .. } => ErrorCategory::Token,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns the OAuth 2.0 style error code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ProviderExchangeFailed { .. } => "access_denied",
            Self::InvalidState { .. } => "invalid_request",
            Self::DirectoryUnavailable { .. } => "temporarily_unavailable",
            Self::TokenSigningFailed { .. } => "server_error",
            Self::Configuration { .. } => "server_error",
        }
    }

    /// Returns the HTTP status used when this error is rendered directly.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProviderExchangeFailed { .. } | Self::InvalidState { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::DirectoryUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::TokenSigningFailed { .. } | Self::Configuration { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side details stay in the logs.
        let description = if self.is_server_error() {
            match self {
                Self::DirectoryUnavailable { .. } => "Sign-in is temporarily unavailable",
                _ => "Sign-in could not be completed",
            }
            .to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": self.error_code(),
            "error_description": description,
        });

        (status, Json(body)).into_response()
    }
}

/// Categories of authentication errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity provider federation errors.
    Federation,
    /// Request validation errors.
    Validation,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Token-related errors.
    Token,
    /// Configuration errors.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Federation => write!(f, "federation"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Token => write!(f, "token"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
