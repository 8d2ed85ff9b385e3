//! Stateless OAuth `state` parameter.
//!
//! The state is a short-lived JWT signed with the token secret, so the
//! callback can be checked for CSRF without server-side sessions. Each state
//! carries a random nonce that is also handed to the browser in a cookie; a
//! callback is only accepted when the two match, which ties the state to the
//! browser that started the login.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::token::{JwtError, JwtService, SigningAlgorithm};
use crate::{AuthError, AuthResult};

/// Audience of state tokens; keeps them from being accepted as access tokens.
pub const STATE_AUDIENCE: &str = "oauth-state";

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    aud: String,
    iat: i64,
    exp: i64,
    nonce: String,
    provider: String,
}

/// A freshly issued state together with the nonce the browser must present.
#[derive(Debug, Clone)]
pub struct IssuedState {
    /// Value sent to the provider as `state`.
    pub value: String,
    /// Nonce embedded in `value`; stored in the browser.
    pub nonce: String,
}

/// Issues and verifies OAuth state values.
#[derive(Debug)]
pub struct StateCodec {
    jwt: JwtService,
    provider: String,
    lifetime: Duration,
}

impl StateCodec {
    /// Creates a codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is empty.
    pub fn new(
        algorithm: SigningAlgorithm,
        secret: &[u8],
        provider: impl Into<String>,
        lifetime: Duration,
    ) -> Result<Self, JwtError> {
        Ok(Self {
            jwt: JwtService::new(algorithm, secret, None)?,
            provider: provider.into(),
            lifetime,
        })
    }

    /// Creates a codec from the auth configuration.
    ///
    /// # Errors
    ///
    /// Returns `TokenSigningFailed` for an unusable algorithm or secret.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let algorithm: SigningAlgorithm = config.tokens.signing_algorithm.parse()?;
        Ok(Self::new(
            algorithm,
            config.tokens.signing_secret.as_bytes(),
            config.provider_name(),
            config.state_lifetime,
        )?)
    }

    /// Issues a fresh state value.
    ///
    /// # Errors
    ///
    /// Returns `TokenSigningFailed` if the state cannot be signed.
    pub fn issue(&self) -> AuthResult<IssuedState> {
        let now = OffsetDateTime::now_utc();
        let nonce = Uuid::new_v4().simple().to_string();
        let claims = StateClaims {
            aud: STATE_AUDIENCE.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + self.lifetime).unix_timestamp(),
            nonce: nonce.clone(),
            provider: self.provider.clone(),
        };
        Ok(IssuedState {
            value: self.jwt.encode(&claims)?,
            nonce,
        })
    }

    /// How long an issued state stays valid.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Verifies a state value returned on the callback.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the value is forged, expired, was issued
    /// for another provider, or `browser_nonce` does not match its nonce.
    pub fn verify(&self, state: &str, browser_nonce: Option<&str>) -> AuthResult<()> {
        let claims = self
            .jwt
            .decode_for_audience::<StateClaims>(state, STATE_AUDIENCE)
            .map_err(|e| AuthError::invalid_state(e.to_string()))?
            .claims;

        if claims.provider != self.provider {
            return Err(AuthError::invalid_state(format!(
                "state was issued for provider '{}'",
                claims.provider
            )));
        }

        match browser_nonce {
            None => Err(AuthError::invalid_state("no state cookie presented")),
            Some(nonce) if nonce != claims.nonce => Err(AuthError::invalid_state(
                "state was issued to a different browser",
            )),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn codec(provider: &str, lifetime: Duration) -> StateCodec {
        StateCodec::new(SigningAlgorithm::HS256, SECRET, provider, lifetime).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let codec = codec("github", Duration::from_secs(600));
        let state = codec.issue().unwrap();
        assert!(codec.verify(&state.value, Some(&state.nonce)).is_ok());
    }

    #[test]
    fn test_states_are_unique() {
        let codec = codec("github", Duration::from_secs(600));
        let (a, b) = (codec.issue().unwrap(), codec.issue().unwrap());
        assert_ne!(a.value, b.value);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_state_bound_to_browser_nonce() {
        let codec = codec("github", Duration::from_secs(600));
        let mine = codec.issue().unwrap();
        let theirs = codec.issue().unwrap();

        let err = codec.verify(&mine.value, Some(&theirs.nonce)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidState { .. }));

        let err = codec.verify(&mine.value, None).unwrap_err();
        assert!(matches!(err, AuthError::InvalidState { .. }));
    }

    #[test]
    fn test_garbage_rejected() {
        let codec = codec("github", Duration::from_secs(600));
        let err = codec.verify("not-a-state", Some("nonce")).unwrap_err();
        assert!(matches!(err, AuthError::InvalidState { .. }));
    }

    #[test]
    fn test_other_provider_rejected() {
        let state = codec("gitlab", Duration::from_secs(600)).issue().unwrap();
        let err = codec("github", Duration::from_secs(600))
            .verify(&state.value, Some(&state.nonce))
            .unwrap_err();
        assert!(err.to_string().contains("gitlab"));
    }

    #[test]
    fn test_access_token_not_accepted_as_state() {
        #[derive(Serialize)]
        struct Claims {
            sub: String,
            exp: i64,
        }

        let jwt = JwtService::new(SigningAlgorithm::HS256, SECRET, None).unwrap();
        let token = jwt
            .encode(&Claims {
                sub: "user".to_string(),
                exp: OffsetDateTime::now_utc().unix_timestamp() + 60,
            })
            .unwrap();

        assert!(
            codec("github", Duration::from_secs(600))
                .verify(&token, Some("nonce"))
                .is_err()
        );
    }
}
