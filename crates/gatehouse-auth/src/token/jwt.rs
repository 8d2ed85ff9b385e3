//! JWT encoding and validation.
//!
//! Access tokens and OAuth state tokens are signed with a shared HMAC
//! secret. The secret and algorithm are fixed at startup.

use std::fmt;
use std::str::FromStr;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// The signing key is unusable.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if the token was rejected (as opposed to a local failure).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::DecodingError { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

impl From<JwtError> for crate::AuthError {
    fn from(err: JwtError) -> Self {
        crate::AuthError::token_signing_failed(err.to_string())
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported HMAC signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256.
    #[default]
    HS256,
    /// HMAC with SHA-384.
    HS384,
    /// HMAC with SHA-512.
    HS512,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::HS384 => Algorithm::HS384,
            Self::HS512 => Algorithm::HS512,
        }
    }

    /// Returns the algorithm name as used in JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = JwtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            other => Err(JwtError::invalid_key(format!(
                "unsupported signing algorithm '{other}'"
            ))),
        }
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// Service for encoding and decoding HMAC-signed JWTs.
///
/// Thread-safe; share it behind an `Arc`.
pub struct JwtService {
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: Option<String>,
}

impl JwtService {
    /// Creates a service from a shared secret.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the secret is empty.
    pub fn new(
        algorithm: SigningAlgorithm,
        secret: &[u8],
        issuer: Option<String>,
    ) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::invalid_key("signing secret is empty"));
        }

        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer,
        })
    }

    /// Encodes claims into a JWT string.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let header = Header::new(self.algorithm.to_jwt_algorithm());
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Decodes and validates a JWT string (signature, `exp`, and `iss` when set).
    ///
    /// # Errors
    /// Returns an error if decoding or validation fails.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        let validation = self.validation(None);
        decode(token, &self.decoding_key, &validation).map_err(JwtError::from)
    }

    /// Like [`decode`](Self::decode), but also requires a matching `aud`.
    ///
    /// # Errors
    /// Returns an error if decoding or validation fails.
    pub fn decode_for_audience<T: DeserializeOwned>(
        &self,
        token: &str,
        audience: &str,
    ) -> Result<TokenData<T>, JwtError> {
        let validation = self.validation(Some(audience));
        decode(token, &self.decoding_key, &validation).map_err(JwtError::from)
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Returns the configured issuer, if any.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    fn validation(&self, audience: Option<&str>) -> Validation {
        let mut validation = Validation::new(self.algorithm.to_jwt_algorithm());
        validation.validate_exp = true;
        validation.leeway = 0;
        let mut required = vec!["exp"];
        if let Some(ref issuer) = self.issuer {
            // set_issuer alone lets a token without `iss` through.
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }
        match audience {
            Some(aud) => {
                validation.set_audience(&[aud]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&required);
        validation
    }
}

impl fmt::Debug for JwtService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtService")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestClaims {
        sub: String,
        exp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        aud: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        iss: Option<String>,
    }

    fn claims(exp_offset: i64) -> TestClaims {
        TestClaims {
            sub: "user-1".to_string(),
            exp: OffsetDateTime::now_utc().unix_timestamp() + exp_offset,
            aud: None,
            iss: None,
        }
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!(
            "HS512".parse::<SigningAlgorithm>().unwrap(),
            SigningAlgorithm::HS512
        );
        assert!("RS256".parse::<SigningAlgorithm>().is_err());
        assert_eq!(SigningAlgorithm::HS384.to_string(), "HS384");
    }

    #[test]
    fn test_empty_secret_rejected() {
        let err = JwtService::new(SigningAlgorithm::HS256, b"", None).unwrap_err();
        assert!(matches!(err, JwtError::InvalidKey { .. }));
    }

    #[test]
    fn test_encode_decode() {
        let service = JwtService::new(SigningAlgorithm::HS256, SECRET, None).unwrap();
        let token = service.encode(&claims(60)).unwrap();
        let decoded = service.decode::<TestClaims>(&token).unwrap();
        assert_eq!(decoded.claims.sub, "user-1");
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = JwtService::new(SigningAlgorithm::HS256, SECRET, None).unwrap();
        let token = service.encode(&claims(-60)).unwrap();
        let err = service.decode::<TestClaims>(&token).unwrap_err();
        assert!(matches!(err, JwtError::Expired));
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer = JwtService::new(SigningAlgorithm::HS256, SECRET, None).unwrap();
        let verifier =
            JwtService::new(SigningAlgorithm::HS256, b"another-secret-another-secret-xx", None)
                .unwrap();
        let token = signer.encode(&claims(60)).unwrap();
        assert!(matches!(
            verifier.decode::<TestClaims>(&token),
            Err(JwtError::InvalidSignature)
        ));
    }

    #[test]
    fn test_audience_enforced() {
        let service = JwtService::new(SigningAlgorithm::HS256, SECRET, None).unwrap();
        let mut with_aud = claims(60);
        with_aud.aud = Some("oauth-state".to_string());
        let token = service.encode(&with_aud).unwrap();

        assert!(
            service
                .decode_for_audience::<TestClaims>(&token, "oauth-state")
                .is_ok()
        );
        assert!(
            service
                .decode_for_audience::<TestClaims>(&token, "other")
                .is_err()
        );
    }

    #[test]
    fn test_issuer_enforced() {
        let service = JwtService::new(
            SigningAlgorithm::HS256,
            SECRET,
            Some("https://auth.example.com".to_string()),
        )
        .unwrap();
        let token = service.encode(&claims(60)).unwrap();
        assert!(matches!(
            service.decode::<TestClaims>(&token),
            Err(JwtError::InvalidClaims { .. })
        ));

        let with_iss = TestClaims {
            iss: Some("https://auth.example.com".to_string()),
            ..claims(60)
        };
        let token = service.encode(&with_iss).unwrap();
        assert_eq!(service.decode::<TestClaims>(&token).unwrap().claims, with_iss);

        let foreign = TestClaims {
            iss: Some("https://elsewhere.example.com".to_string()),
            ..claims(60)
        };
        let token = service.encode(&foreign).unwrap();
        assert!(service.decode::<TestClaims>(&token).is_err());
    }
}
