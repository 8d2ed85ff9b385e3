//! Opaque refresh token values.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use time::OffsetDateTime;

/// Number of random bytes in a refresh token.
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Generate a cryptographically secure random token.
///
/// Returns a 256-bit random value encoded as base64url (43 characters).
#[must_use]
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A refresh token that has been persisted and may be handed to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedRefreshToken {
    /// The opaque token value.
    pub token: String,
    /// When the token was issued.
    pub issued_at: OffsetDateTime,
    /// When the token stops being usable.
    pub expires_at: OffsetDateTime,
}

impl fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("token", &"[redacted]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
