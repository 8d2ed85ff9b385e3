//! Access and refresh token issuance.
//!
//! [`TokenIssuer`] signs access tokens from a [`User`] and persists refresh
//! tokens through the identity directory. It is built once at startup and
//! shared across requests.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::jwt::{JwtError, JwtService, SigningAlgorithm};
use super::refresh::{IssuedRefreshToken, generate_refresh_token};
use crate::config::TokenConfig;
use crate::directory::{IdentityDirectory, RefreshTokenRecord, User};
use crate::{AuthError, AuthResult};

/// Claim names owned by the issuer. Configured user fields may not use them.
pub const RESERVED_CLAIMS: &[&str] = &[
    "sub",
    "iss",
    "aud",
    "iat",
    "exp",
    "nbf",
    "jti",
    "roles",
    "default_role",
    "is_anonymous",
];

/// Prefix of the Hasura-compatible session claims.
const HASURA_CLAIM_PREFIX: &str = "x-hasura-";

// ============================================================================
// Claims
// ============================================================================

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// Subject (user id).
    pub sub: String,

    /// Issuer, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Unique token id.
    pub jti: String,

    /// Roles assigned to the user.
    pub roles: Vec<String>,

    /// The user's default role.
    pub default_role: String,

    /// Whether the user is anonymous.
    pub is_anonymous: bool,

    /// Configured user fields and the optional namespaced claims block.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccessTokenClaims {
    /// Returns the subject as a user id.
    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    /// Returns an additional claim by name.
    #[must_use]
    pub fn extra_claim(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

// ============================================================================
// Token Issuer
// ============================================================================

/// Mints access tokens and persisted refresh tokens.
pub struct TokenIssuer {
    jwt: JwtService,
    directory: Arc<dyn IdentityDirectory>,
    access_token_lifetime: Duration,
    refresh_token_lifetime: Duration,
    claims_namespace: Option<String>,
    user_fields: Vec<String>,
}

impl TokenIssuer {
    /// Builds an issuer from configuration.
    ///
    /// # Errors
    ///
    /// Returns `TokenSigningFailed` if the algorithm is unsupported or the
    /// signing secret is missing.
    pub fn from_config(
        config: &TokenConfig,
        directory: Arc<dyn IdentityDirectory>,
    ) -> AuthResult<Self> {
        let algorithm: SigningAlgorithm = config.signing_algorithm.parse()?;
        let jwt = JwtService::new(
            algorithm,
            config.signing_secret.as_bytes(),
            config.issuer.clone(),
        )?;

        Ok(Self {
            jwt,
            directory,
            access_token_lifetime: config.access_token_lifetime,
            refresh_token_lifetime: config.refresh_token_lifetime,
            claims_namespace: config.claims_namespace.clone(),
            user_fields: config.user_fields.clone(),
        })
    }

    /// Returns the configured refresh token window.
    #[must_use]
    pub fn refresh_token_lifetime(&self) -> Duration {
        self.refresh_token_lifetime
    }

    /// Builds the claims for a user at a given instant.
    #[must_use]
    pub fn claims_for(&self, user: &User, now: OffsetDateTime) -> AccessTokenClaims {
        let mut extra = Map::new();
        for field in &self.user_fields {
            if let Some(value) = user.field(field) {
                extra.insert(field.clone(), value);
            }
        }
        if let Some(ref namespace) = self.claims_namespace {
            extra.insert(namespace.clone(), self.namespaced_claims(user));
        }

        AccessTokenClaims {
            sub: user.id.to_string(),
            iss: self.jwt.issuer().map(str::to_string),
            iat: now.unix_timestamp(),
            exp: (now + self.access_token_lifetime).unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
            roles: user.roles.clone(),
            default_role: user.default_role.clone(),
            is_anonymous: user.is_anonymous,
            extra,
        }
    }

    /// Signs an access token for the user.
    ///
    /// # Errors
    ///
    /// Returns `TokenSigningFailed` if the token cannot be encoded.
    pub fn issue_access_token(&self, user: &User) -> AuthResult<String> {
        let claims = self.claims_for(user, OffsetDateTime::now_utc());
        self.jwt.encode(&claims).map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "Failed to sign access token");
            AuthError::token_signing_failed(e.to_string())
        })
    }

    /// Generates and persists a refresh token for the user.
    ///
    /// The token is returned only once the directory has stored it.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryUnavailable` if the record cannot be persisted.
    pub async fn issue_refresh_token(&self, user: &User) -> AuthResult<IssuedRefreshToken> {
        let issued_at = OffsetDateTime::now_utc();
        let expires_at = issued_at + self.refresh_token_lifetime;
        let record = RefreshTokenRecord {
            token: generate_refresh_token(),
            user_id: user.id,
            expires_at,
        };

        self.directory
            .insert_refresh_token(&record)
            .await
            .map_err(|e| {
                tracing::error!(user_id = %user.id, error = %e, "Failed to persist refresh token");
                AuthError::directory_unavailable(e.to_string())
            })?;

        tracing::debug!(user_id = %user.id, %expires_at, "Refresh token issued");

        Ok(IssuedRefreshToken {
            token: record.token,
            issued_at,
            expires_at,
        })
    }

    /// Verifies an access token's signature and expiry.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the token is expired, forged or malformed.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        Ok(self.jwt.decode::<AccessTokenClaims>(token)?.claims)
    }

    fn namespaced_claims(&self, user: &User) -> Value {
        let mut claims = Map::new();
        claims.insert(
            format!("{HASURA_CLAIM_PREFIX}user-id"),
            Value::String(user.id.to_string()),
        );
        claims.insert(
            format!("{HASURA_CLAIM_PREFIX}default-role"),
            Value::String(user.default_role.clone()),
        );
        claims.insert(
            format!("{HASURA_CLAIM_PREFIX}allowed-roles"),
            Value::Array(user.roles.iter().cloned().map(Value::String).collect()),
        );
        claims.insert(
            format!("{HASURA_CLAIM_PREFIX}is-anonymous"),
            Value::String(user.is_anonymous.to_string()),
        );

        // Session variables are strings
        for field in &self.user_fields {
            if let Some(value) = user.field(field) {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                claims.insert(
                    format!("{HASURA_CLAIM_PREFIX}{}", field.replace('_', "-")),
                    Value::String(value),
                );
            }
        }

        Value::Object(claims)
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("jwt", &self.jwt)
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("refresh_token_lifetime", &self.refresh_token_lifetime)
            .field("claims_namespace", &self.claims_namespace)
            .field("user_fields", &self.user_fields)
            .finish_non_exhaustive()
    }
}
