//! Session token issuance.
//!
//! This module provides:
//!
//! - JWT encoding and decoding with a shared HMAC secret
//! - Access token claims and signing
//! - Opaque, persisted refresh tokens

pub mod jwt;
pub mod refresh;
pub mod service;

pub use jwt::{JwtError, JwtService, SigningAlgorithm};
pub use refresh::{IssuedRefreshToken, generate_refresh_token};
pub use service::{AccessTokenClaims, RESERVED_CLAIMS, TokenIssuer};
